// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use log::debug;
use tokio::sync::mpsc;

use crate::model::payload::EventRecord;

/// Receives each notification routed off the feed, in arrival order.
pub(crate) trait EventSink: Send + Sync {
    fn deliver(&self, record: EventRecord);
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn deliver(&self, record: EventRecord) {
        (**self).deliver(record);
    }
}

/// Sink that forwards records into an unbounded channel for consumption
/// elsewhere, e.g. a rendering loop.
pub(crate) struct Channel {
    tx: mpsc::UnboundedSender<EventRecord>,
}

impl Channel {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for Channel {
    fn deliver(&self, record: EventRecord) {
        if self.tx.send(record).is_err() {
            debug!("Dropping notification delivered after the receiver went away");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::payload::Payload;

    fn record(name: &str, id: u64) -> EventRecord {
        EventRecord::new(
            name.to_owned(),
            Payload::decode("import-order-created", Some(&json!({"id": id}))),
        )
    }

    #[tokio::test]
    async fn test_channel_forwards_in_order() {
        let (sink, mut rx) = Channel::new();
        sink.deliver(record("import-order-created", 1));
        sink.deliver(record("import-order-created", 2));

        assert_eq!(rx.recv().await.map(|r| r.name), Some("import-order-created".to_owned()));
        assert!(matches!(
            rx.recv().await.map(|r| r.payload),
            Some(Payload::ImportOrder(order)) if order.id == 2
        ));
    }

    #[test]
    fn test_channel_tolerates_closed_receiver() {
        let (sink, rx) = Channel::new();
        drop(rx);

        // Must not panic or error.
        sink.deliver(record("import-order-created", 1));
    }
}
