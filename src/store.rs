// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use tokio::sync::watch;

use crate::{
    channel::ChannelName,
    error::{self, Result},
    model::payload::EventRecord,
};

/// Connection phase of the subscription, in the order a healthy session moves
/// through them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Phase {
    Idle,
    Connecting,
    Subscribed,
    Error,
}

/// Externally observable state of the subscription.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Status {
    pub(crate) phase: Phase,
    pub(crate) channel: Option<ChannelName>,
    pub(crate) error: Option<String>,
}

impl Status {
    pub(crate) fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            channel: None,
            error: None,
        }
    }

    /// Idle on purpose, with a note explaining why nothing will be delivered,
    /// e.g. a role with no mapped channel.
    pub(crate) fn idle_because(message: String) -> Self {
        Self {
            phase: Phase::Idle,
            channel: None,
            error: Some(message),
        }
    }

    pub(crate) fn connecting(channel: ChannelName) -> Self {
        Self {
            phase: Phase::Connecting,
            channel: Some(channel),
            error: None,
        }
    }

    pub(crate) fn subscribed(channel: ChannelName) -> Self {
        Self {
            phase: Phase::Subscribed,
            channel: Some(channel),
            error: None,
        }
    }

    pub(crate) fn failed(message: String) -> Self {
        Self {
            phase: Phase::Error,
            channel: None,
            error: Some(message),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.phase == Phase::Subscribed
    }

    pub(crate) fn connection_error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::idle()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.phase, self.channel.as_ref(), self.error.as_ref()) {
            (Phase::Idle, _, None) => write!(f, "idle"),
            (Phase::Idle, _, Some(message)) => write!(f, "idle ({})", message),
            (Phase::Connecting, Some(channel), _) => write!(f, "connecting to {}", channel),
            (Phase::Connecting, None, _) => write!(f, "connecting"),
            (Phase::Subscribed, Some(channel), _) => write!(f, "subscribed to {}", channel),
            (Phase::Subscribed, None, _) => write!(f, "subscribed"),
            (Phase::Error, _, Some(message)) => write!(f, "error: {}", message),
            (Phase::Error, _, None) => write!(f, "error"),
        }
    }
}

/// Create the store's write and read halves. The writer belongs to the
/// subscription worker; views can be cloned freely.
pub(crate) fn channel() -> (Store, View) {
    let (status_tx, status_rx) = watch::channel(Status::default());
    let (latest_tx, latest_rx) = watch::channel(None);
    (
        Store {
            status_tx,
            latest_tx,
        },
        View {
            status_rx,
            latest_rx,
        },
    )
}

/// Write half of the notification store.
pub(crate) struct Store {
    status_tx: watch::Sender<Status>,
    latest_tx: watch::Sender<Option<EventRecord>>,
}

impl Store {
    pub(crate) fn set_status(&self, status: Status) {
        if *self.status_tx.borrow() == status {
            return;
        }
        let _ = self.status_tx.send_replace(status);
    }

    /// Record the most recent notification. Only the latest value is kept;
    /// each write replaces the previous one.
    pub(crate) fn record(&self, record: EventRecord) {
        let _ = self.latest_tx.send_replace(Some(record));
    }
}

/// Read half of the notification store.
#[derive(Clone)]
pub(crate) struct View {
    status_rx: watch::Receiver<Status>,
    latest_rx: watch::Receiver<Option<EventRecord>>,
}

impl View {
    pub(crate) fn status(&self) -> Status {
        self.status_rx.borrow().clone()
    }

    pub(crate) fn latest(&self) -> Option<EventRecord> {
        self.latest_rx.borrow().clone()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    pub(crate) fn connection_error(&self) -> Option<String> {
        self.status_rx.borrow().connection_error().map(str::to_owned)
    }

    /// Wait for the status to change from the last observed value. Fails if
    /// the writer has gone away.
    pub(crate) async fn status_changed(&mut self) -> Result<()> {
        self.status_rx
            .changed()
            .await
            .map_err(Into::<error::Internal>::into)
            .map_err(Into::into)
    }
}
