// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{future, time::Duration};

use futures_util::{SinkExt as _, StreamExt as _};
use log::{debug, info, warn};
use tokio::{select, sync::watch, time};

use crate::{
    auth::AuthContext,
    catalog::{Catalog, Classification},
    channel::{self, ChannelName},
    error::{self, Result},
    model::{self, payload},
    sink::EventSink,
    store::{Status, Store},
};

use super::{authenticator::Authenticator, transport};

/// Which form of the resolved channel to subscribe to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Visibility {
    /// The private channel, which requires an authorization grant.
    Private,
    /// The public channel, delivered without authorization.
    Public,
}

/// What to do after a connection failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ReconnectPolicy {
    /// Report the error and wait for the session to change.
    Never,
    /// Retry, doubling the delay on each consecutive failure up to `max`.
    Backoff { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub(crate) const BACKOFF: Self = Self::Backoff {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(30),
    };

    fn delay(self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Backoff { initial, max } => Some(
                initial
                    .saturating_mul(2_u32.saturating_pow(attempt))
                    .min(max),
            ),
        }
    }
}

/// How the subscription reacts to a session change: leave the current binding
/// alone, drop it, or bind a different channel.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Transition {
    Keep,
    TearDown { disconnect: bool },
    Resubscribe { channel: ChannelName },
}

/// Decide the transition from the currently bound channel to the channel the
/// new session wants. An authenticated session that merely loses its channel
/// keeps the transport open so a later grant can reuse it; an unauthenticated
/// one disconnects outright.
fn plan(
    current: Option<&ChannelName>,
    desired: Option<ChannelName>,
    authenticated: bool,
) -> Transition {
    match (current, desired) {
        (None, None) => Transition::Keep,
        (Some(current), Some(ref desired)) if current == desired => Transition::Keep,
        (_, Some(channel)) => Transition::Resubscribe { channel },
        (Some(_), None) => Transition::TearDown {
            disconnect: !authenticated,
        },
    }
}

/// Progress of the server handshake on one transport connection.
#[derive(Debug)]
enum Link {
    AwaitingHello,
    Ready { socket_id: model::SocketId },
}

/// Progress of the channel subscription on one transport connection.
#[derive(Debug)]
enum Binding {
    Unbound,
    Queued(ChannelName),
    AwaitingAck(ChannelName),
    Bound(ChannelName),
}

impl Binding {
    fn target(&self) -> Option<&ChannelName> {
        match *self {
            Binding::Unbound => None,
            Binding::Queued(ref channel)
            | Binding::AwaitingAck(ref channel)
            | Binding::Bound(ref channel) => Some(channel),
        }
    }
}

struct Connection<T> {
    stream: T,
    link: Link,
    binding: Binding,
}

async fn next_frame<T: transport::Stream>(
    conn: &mut Option<Connection<T>>,
) -> Option<Result<model::ServerFrame>> {
    match conn.as_mut() {
        Some(conn) => conn.stream.next().await,
        None => future::pending().await,
    }
}

async fn wait_until(deadline: Option<time::Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

pub(super) struct Manager<C: transport::Connector, A: Authenticator, S: EventSink> {
    connector: C,
    authenticator: A,
    catalog: Catalog,
    policy: ReconnectPolicy,
    visibility: Visibility,
    auth_rx: watch::Receiver<AuthContext>,
    sink: S,
    store: Store,
    conn: Option<Connection<C::Stream>>,
    attempts: u32,
    retry_at: Option<time::Instant>,
}

impl<C: transport::Connector, A: Authenticator, S: EventSink> Manager<C, A, S> {
    pub(super) fn new(feed: super::Feed<C, A>, sink: S, store: Store) -> Self {
        Self {
            connector: feed.connector,
            authenticator: feed.authenticator,
            catalog: feed.catalog,
            policy: feed.policy,
            visibility: feed.visibility,
            auth_rx: feed.auth_rx,
            sink,
            store,
            conn: None,
            attempts: 0,
            retry_at: None,
        }
    }

    pub(super) async fn run(mut self) -> Result<()> {
        let initial = self.auth_rx.borrow_and_update().clone();
        self.apply_context(initial).await;

        loop {
            select! {
                candidate = self.auth_rx.changed() => {
                    if candidate.is_err() {
                        // The session handle is gone; tear down and finish.
                        self.teardown(true).await;
                        self.store.set_status(Status::idle());
                        return Ok(());
                    }

                    let ctx = self.auth_rx.borrow_and_update().clone();
                    debug!("Session context changed: {:?}", ctx);
                    self.attempts = 0;
                    self.retry_at = None;
                    self.apply_context(ctx).await;
                }
                candidate = next_frame(&mut self.conn) => match candidate {
                    Some(Ok(frame)) => self.handle_frame(frame).await,
                    Some(Err(e)) => self.handle_disruption(e.to_string()).await,
                    None => {
                        self.handle_disruption(error::Transport::StreamEnded.to_string())
                            .await;
                    }
                },
                () = wait_until(self.retry_at) => {
                    info!("Retrying the subscription after a connection failure");
                    self.retry_at = None;
                    let ctx = self.auth_rx.borrow().clone();
                    self.apply_context(ctx).await;
                }
            }
        }
    }

    /// The channel the session wants to be subscribed to, if any.
    fn desired_channel(&self, ctx: &AuthContext) -> Option<ChannelName> {
        if !ctx.is_authenticated || ctx.account_id.is_none() {
            return None;
        }
        let resolved = channel::resolve(ctx.role.as_ref()?)?;
        Some(match self.visibility {
            Visibility::Private => resolved,
            Visibility::Public => resolved.into_public(),
        })
    }

    async fn apply_context(&mut self, ctx: AuthContext) {
        let desired = self.desired_channel(&ctx);
        let current = self
            .conn
            .as_ref()
            .and_then(|conn| conn.binding.target().cloned());

        match plan(current.as_ref(), desired, ctx.is_authenticated) {
            Transition::Keep => {
                // A transport can outlive its binding; logging out still has
                // to close it.
                if !ctx.is_authenticated && self.conn.is_some() {
                    self.teardown(true).await;
                }
                self.note_idle(&ctx);
            }
            Transition::TearDown { disconnect } => {
                self.teardown(disconnect).await;
                self.note_idle(&ctx);
            }
            Transition::Resubscribe { channel } => self.rebind(channel).await,
        }
    }

    /// Report why nothing is subscribed. Does not touch the status while a
    /// binding is still in progress or a retry is pending.
    fn note_idle(&self, ctx: &AuthContext) {
        if self
            .conn
            .as_ref()
            .map_or(false, |conn| conn.binding.target().is_some())
        {
            return;
        }
        if self.retry_at.is_some() {
            return;
        }

        let status = if !ctx.is_authenticated {
            Status::idle()
        } else {
            match ctx.role {
                None => Status::idle_because("session carries no role claim".to_owned()),
                Some(ref role) => match channel::resolve(role) {
                    None => Status::idle_because(
                        error::Subscription::UnmappedRole(role.clone()).to_string(),
                    ),
                    Some(_) if ctx.account_id.is_none() => {
                        Status::idle_because("session carries no account id".to_owned())
                    }
                    Some(_) => Status::idle(),
                },
            }
        };
        self.store.set_status(status);
    }

    /// Release the current binding and bind `channel`, reusing the transport
    /// connection when one is already open.
    async fn rebind(&mut self, channel: ChannelName) {
        self.unbind().await;
        self.store.set_status(Status::connecting(channel.clone()));

        if self.conn.is_none() {
            match self.connector.connect().await {
                Ok(stream) => {
                    debug!("Transport connected; waiting for the server handshake");
                    self.conn = Some(Connection {
                        stream,
                        link: Link::AwaitingHello,
                        binding: Binding::Queued(channel),
                    });
                }
                Err(e) => self.fail(e.to_string(), true).await,
            }
            return;
        }

        self.subscribe(channel).await;
    }

    /// Send the subscription for `channel`, authorizing it first if it is
    /// private. Queues the channel instead if the handshake is still pending.
    async fn subscribe(&mut self, channel: ChannelName) {
        let socket_id = match self.conn {
            Some(Connection {
                link: Link::Ready { ref socket_id },
                ..
            }) => socket_id.clone(),
            Some(ref mut conn) => {
                conn.binding = Binding::Queued(channel);
                return;
            }
            None => return,
        };

        let auth = if channel.is_private() {
            match self.authenticator.authorize(&socket_id, &channel).await {
                Ok(token) => Some(token),
                Err(e) => {
                    self.fail(e.to_string(), true).await;
                    return;
                }
            }
        } else {
            None
        };

        // The authorization round trip is an await point, so the session may
        // have moved on while the grant was in flight.
        let wanted = {
            let ctx = self.auth_rx.borrow().clone();
            self.desired_channel(&ctx) == Some(channel.clone())
        };
        if !wanted {
            debug!("Discarding stale authorization grant for {}", channel);
            return;
        }

        let frame = model::ClientFrame::Subscribe {
            data: model::SubscribeData {
                channel: channel.clone(),
                auth,
            },
        };
        let sent = match self.conn.as_mut() {
            Some(conn) => {
                let result = conn.stream.send(frame).await;
                if result.is_ok() {
                    conn.binding = Binding::AwaitingAck(channel);
                }
                result
            }
            None => Ok(()),
        };
        if let Err(e) = sent {
            self.fail(e.to_string(), true).await;
        }
    }

    /// Clear the binding, unsubscribing from the server if the subscription
    /// was already announced. The transport connection stays open.
    async fn unbind(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            // Stop routing first so nothing is delivered mid-teardown.
            match std::mem::replace(&mut conn.binding, Binding::Unbound) {
                Binding::AwaitingAck(channel) | Binding::Bound(channel) => {
                    debug!("Unsubscribing from {}", channel);
                    let frame = model::ClientFrame::Unsubscribe {
                        data: model::UnsubscribeData { channel },
                    };
                    if let Err(e) = conn.stream.send(frame).await {
                        debug!("Failed to send the unsubscribe frame: {}", e);
                    }
                }
                Binding::Unbound | Binding::Queued(_) => {}
            }
        }
    }

    async fn teardown(&mut self, disconnect: bool) {
        self.unbind().await;
        if !disconnect {
            return;
        }

        if let Some(mut conn) = self.conn.take() {
            debug!("Disconnecting from the notification server");
            if let Err(e) = conn.stream.close().await {
                debug!("Failed to close the transport cleanly: {}", e);
            }
        }
    }

    async fn fail(&mut self, message: String, retryable: bool) {
        self.teardown(true).await;
        self.store.set_status(Status::failed(message));
        self.schedule_retry(retryable);
    }

    fn schedule_retry(&mut self, retryable: bool) {
        self.retry_at = None;
        if !retryable {
            self.attempts = 0;
            return;
        }

        let wanted = {
            let ctx = self.auth_rx.borrow();
            self.desired_channel(&ctx).is_some()
        };
        if !wanted {
            self.attempts = 0;
            return;
        }

        match self.policy.delay(self.attempts) {
            None => self.attempts = 0,
            Some(delay) => {
                info!(
                    "Will retry the subscription in {:?} (attempt {})",
                    delay,
                    self.attempts + 1
                );
                self.attempts += 1;
                self.retry_at = Some(time::Instant::now() + delay);
            }
        }
    }

    async fn handle_frame(&mut self, frame: model::ServerFrame) {
        let name = model::normalized(&frame.event).into_owned();
        match name.as_str() {
            model::CONNECTION_ESTABLISHED => self.handle_hello(&frame).await,
            model::SUBSCRIPTION_SUCCEEDED => self.handle_subscribed(&frame),
            model::SUBSCRIPTION_ERROR => self.handle_refusal(&frame).await,
            model::PING => self.handle_ping().await,
            model::PONG => debug!("Ignoring unsolicited pong"),
            model::ERROR => self.handle_remote_error(&frame).await,
            _ => self.route(frame, &name),
        }
    }

    async fn handle_hello(&mut self, frame: &model::ServerFrame) {
        let hello: model::ConnectionEstablished = match frame.system_payload() {
            Ok(hello) => hello,
            Err(e) => {
                self.fail(format!("server handshake could not be parsed: {}", e), true)
                    .await;
                return;
            }
        };

        info!("Connected to the notification server as {}", hello.socket_id);
        if let Some(timeout) = hello.activity_timeout {
            debug!("Server advertises an activity timeout of {}s", timeout);
        }

        let queued = match self.conn.as_mut() {
            None => return,
            Some(conn) => {
                conn.link = Link::Ready {
                    socket_id: hello.socket_id,
                };
                match std::mem::replace(&mut conn.binding, Binding::Unbound) {
                    Binding::Queued(channel) => Some(channel),
                    other => {
                        conn.binding = other;
                        None
                    }
                }
            }
        };
        if let Some(channel) = queued {
            self.subscribe(channel).await;
        }
    }

    fn handle_subscribed(&mut self, frame: &model::ServerFrame) {
        let bound = match self.conn.as_mut() {
            None => None,
            Some(conn) => {
                let acked = frame.channel.as_deref();
                match std::mem::replace(&mut conn.binding, Binding::Unbound) {
                    Binding::AwaitingAck(channel) if acked == Some(channel.as_str()) => {
                        conn.binding = Binding::Bound(channel.clone());
                        Some(channel)
                    }
                    other => {
                        conn.binding = other;
                        None
                    }
                }
            }
        };

        match bound {
            Some(channel) => {
                info!("Subscribed to {}", channel);
                self.attempts = 0;
                self.retry_at = None;
                self.store.set_status(Status::subscribed(channel));
            }
            None => debug!(
                "Ignoring subscription acknowledgment for channel {:?}",
                frame.channel
            ),
        }
    }

    async fn handle_refusal(&mut self, frame: &model::ServerFrame) {
        let message = frame.data_value().map_or_else(
            || "subscription rejected".to_owned(),
            |value| value.to_string(),
        );
        let refusal = error::Subscription::Refused {
            channel: frame.channel.clone().unwrap_or_default(),
            message,
        };
        self.fail(refusal.to_string(), true).await;
    }

    async fn handle_remote_error(&mut self, frame: &model::ServerFrame) {
        let data: model::RemoteError = frame.system_payload().unwrap_or_default();

        // Error codes below 4100 mean the server will not accept another
        // attempt with the same parameters.
        let retryable = data.code.map_or(true, |code| code >= 4100);
        let message = error::Transport::Remote {
            code: data.code,
            message: data
                .message
                .unwrap_or_else(|| "unspecified server error".to_owned()),
        }
        .to_string();

        warn!("Server reported an error: {}", message);
        self.fail(message, retryable).await;
    }

    async fn handle_ping(&mut self) {
        debug!("Answering a server ping");
        let failed = match self.conn.as_mut() {
            Some(conn) => conn.stream.send(model::ClientFrame::pong()).await.err(),
            None => None,
        };
        if let Some(e) = failed {
            self.handle_disruption(e.to_string()).await;
        }
    }

    async fn handle_disruption(&mut self, message: String) {
        warn!("Notification transport was disrupted: {}", message);
        self.fail(message, true).await;
    }

    /// Forward an application event to the store and the sink, provided it
    /// belongs to the bound channel and the catalog recognizes it.
    fn route(&mut self, frame: model::ServerFrame, normalized: &str) {
        let bound = self.conn.as_ref().and_then(|conn| match conn.binding {
            Binding::Bound(ref channel) => Some(channel.as_str().to_owned()),
            _ => None,
        });
        match bound {
            Some(ref channel) if frame.channel.as_deref() == Some(channel.as_str()) => {}
            Some(_) => {
                debug!(
                    "Dropping event {} for unexpected channel {:?}",
                    frame.event, frame.channel
                );
                return;
            }
            None => {
                debug!("Dropping event {} with no bound channel", frame.event);
                return;
            }
        }

        match self.catalog.classify(normalized) {
            Classification::Ignored => debug!("Ignoring event {}", frame.event),
            Classification::Static => self.deliver(frame, None),
            Classification::Dynamic { base } => self.deliver(frame, Some(base)),
        }
    }

    fn deliver(&mut self, frame: model::ServerFrame, base: Option<String>) {
        let data = frame.data_value();
        let family = base.as_deref().unwrap_or(frame.event.as_str());
        let decoded = payload::Payload::decode(family, data.as_ref());
        let record = payload::EventRecord::new(frame.event, decoded);

        self.store.record(record.clone());
        self.sink.deliver(record);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        task::{Context, Poll},
    };

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::{
        sync::{mpsc, watch},
        time::timeout,
    };
    use uuid::uuid;

    use super::*;
    use crate::{
        auth::Role,
        feed::Feed,
        model::payload::{EventRecord, Payload},
        sink,
        store::{self, Phase, View},
    };

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug)]
    enum Outbound {
        Frame(model::ClientFrame),
        Closed,
    }

    struct ScriptedStream {
        inbound: mpsc::UnboundedReceiver<Result<model::ServerFrame>>,
        outbound: mpsc::UnboundedSender<Outbound>,
        closed: bool,
    }

    struct Script {
        inbound: mpsc::UnboundedSender<Result<model::ServerFrame>>,
        outbound: mpsc::UnboundedReceiver<Outbound>,
    }

    fn scripted() -> (ScriptedStream, Script) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            ScriptedStream {
                inbound: inbound_rx,
                outbound: outbound_tx,
                closed: false,
            },
            Script {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }

    impl futures_util::Stream for ScriptedStream {
        type Item = Result<model::ServerFrame>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inbound.poll_recv(cx)
        }
    }

    impl futures_util::Sink<model::ClientFrame> for ScriptedStream {
        type Error = error::Error;

        fn poll_ready(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: model::ClientFrame) -> Result<(), Self::Error> {
            let _ = self.outbound.send(Outbound::Frame(item));
            Ok(())
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            if !self.closed {
                self.closed = true;
                let _ = self.outbound.send(Outbound::Closed);
            }
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Clone)]
    struct StubConnector {
        streams: Arc<Mutex<VecDeque<ScriptedStream>>>,
        connects: Arc<AtomicUsize>,
    }

    impl StubConnector {
        fn new<I: IntoIterator<Item = ScriptedStream>>(streams: I) -> Self {
            Self {
                streams: Arc::new(Mutex::new(streams.into_iter().collect())),
                connects: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn push(&self, stream: ScriptedStream) {
            if let Ok(mut streams) = self.streams.lock() {
                streams.push_back(stream);
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl transport::Connector for StubConnector {
        type Stream = ScriptedStream;

        async fn connect(&self) -> Result<Self::Stream> {
            let _ = self.connects.fetch_add(1, Ordering::SeqCst);
            self.streams
                .lock()
                .map_err(|_| error::Internal::ChannelClosed)?
                .pop_front()
                .ok_or_else(|| error::Transport::StreamEnded.into())
        }
    }

    #[derive(Clone)]
    struct StubAuthenticator {
        grants: Arc<Mutex<VecDeque<Result<model::AuthToken>>>>,
        calls: Arc<Mutex<Vec<(model::SocketId, ChannelName)>>>,
        delay: Option<Duration>,
    }

    impl StubAuthenticator {
        fn new<I: IntoIterator<Item = Result<model::AuthToken>>>(grants: I) -> Self {
            Self {
                grants: Arc::new(Mutex::new(grants.into_iter().collect())),
                calls: Arc::new(Mutex::new(Vec::new())),
                delay: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> Vec<(model::SocketId, ChannelName)> {
            self.calls
                .lock()
                .map(|calls| calls.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Authenticator for StubAuthenticator {
        async fn authorize(
            &self,
            socket_id: &model::SocketId,
            channel: &ChannelName,
        ) -> Result<model::AuthToken> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((socket_id.clone(), channel.clone()));
            }
            if let Some(delay) = self.delay {
                time::sleep(delay).await;
            }
            match self.grants.lock() {
                Ok(mut grants) => grants
                    .pop_front()
                    .unwrap_or_else(|| Ok(model::AuthToken::from("key:stub".to_owned()))),
                Err(_) => Err(error::Internal::ChannelClosed.into()),
            }
        }
    }

    fn spawn(
        connector: StubConnector,
        authenticator: StubAuthenticator,
        policy: ReconnectPolicy,
        visibility: Visibility,
        initial: AuthContext,
    ) -> (
        watch::Sender<AuthContext>,
        View,
        mpsc::UnboundedReceiver<EventRecord>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let (auth_tx, auth_rx) = watch::channel(initial);
        let (event_sink, events) = sink::Channel::new();
        let (writer, view) = store::channel();
        let feed = Feed::new(connector, authenticator, auth_rx)
            .with_policy(policy)
            .with_visibility(visibility);
        let worker = tokio::spawn(Manager::new(feed, event_sink, writer).run());
        (auth_tx, view, events, worker)
    }

    fn admin() -> AuthContext {
        AuthContext::logged_in(Role::Admin, uuid!("6d9046e9-36b5-43a4-a09a-46170c2fcff4"))
    }

    fn server_frame(
        event: &str,
        channel: Option<&str>,
        data: Option<serde_json::Value>,
    ) -> model::ServerFrame {
        model::ServerFrame {
            event: event.to_owned(),
            channel: channel.map(str::to_owned),
            data,
        }
    }

    fn hello(socket_id: &str) -> model::ServerFrame {
        server_frame(
            model::CONNECTION_ESTABLISHED,
            None,
            Some(json!(
                json!({"socket_id": socket_id, "activity_timeout": 120}).to_string()
            )),
        )
    }

    fn ack(channel: &str) -> model::ServerFrame {
        // Acknowledgments arrive under the internal namespace.
        server_frame(
            "pusher_internal:subscription_succeeded",
            Some(channel),
            Some(json!("{}")),
        )
    }

    fn notification(event: &str, channel: &str, data: serde_json::Value) -> model::ServerFrame {
        server_frame(event, Some(channel), Some(json!(data.to_string())))
    }

    async fn next_outbound(script: &mut Script) -> Outbound {
        match timeout(WAIT, script.outbound.recv()).await {
            Ok(Some(outbound)) => outbound,
            Ok(None) => panic!("outbound channel closed unexpectedly"),
            Err(_) => panic!("timed out waiting for an outbound frame"),
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<EventRecord>) -> EventRecord {
        match timeout(WAIT, events.recv()).await {
            Ok(Some(record)) => record,
            Ok(None) => panic!("event channel closed unexpectedly"),
            Err(_) => panic!("timed out waiting for a notification"),
        }
    }

    async fn wait_for_status<F: Fn(&Status) -> bool>(view: &mut View, pred: F) {
        let deadline = time::Instant::now() + WAIT;
        loop {
            if pred(&view.status()) {
                return;
            }
            let remaining = deadline.saturating_duration_since(time::Instant::now());
            match timeout(remaining, view.status_changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    panic!("timed out waiting for status, last was {:?}", view.status())
                }
            }
        }
    }

    #[test]
    fn test_plan_decision_table() {
        let admin = ChannelName::private_for(&Role::Admin);
        let staff = ChannelName::private_for(&Role::Staff);

        assert_eq!(plan(None, None, false), Transition::Keep);
        assert_eq!(plan(None, None, true), Transition::Keep);
        assert_eq!(plan(Some(&admin), Some(admin.clone()), true), Transition::Keep);
        assert_eq!(
            plan(None, Some(admin.clone()), true),
            Transition::Resubscribe {
                channel: admin.clone()
            }
        );
        assert_eq!(
            plan(Some(&admin), Some(staff.clone()), true),
            Transition::Resubscribe { channel: staff }
        );
        assert_eq!(
            plan(Some(&admin), None, true),
            Transition::TearDown { disconnect: false }
        );
        assert_eq!(
            plan(Some(&admin), None, false),
            Transition::TearDown { disconnect: true }
        );
    }

    #[test]
    fn test_reconnect_policy_delay() {
        assert_eq!(ReconnectPolicy::Never.delay(0), None);

        let policy = ReconnectPolicy::BACKOFF;
        assert_eq!(policy.delay(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay(4), Some(Duration::from_secs(16)));
        assert_eq!(policy.delay(5), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay(100), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_login_subscribes_with_authorization_grant() {
        let (stream, mut script) = scripted();
        let connector = StubConnector::new([stream]);
        let authenticator = StubAuthenticator::new([]);
        let (auth_tx, mut view, _events, worker) = spawn(
            connector.clone(),
            authenticator.clone(),
            ReconnectPolicy::Never,
            Visibility::Private,
            AuthContext::logged_out(),
        );

        assert_eq!(view.status(), Status::idle());
        assert!(auth_tx.send(admin()).is_ok());

        wait_for_status(&mut view, |status| status.phase == Phase::Connecting).await;
        assert_eq!(connector.connects(), 1);
        assert!(script.inbound.send(Ok(hello("81607.152"))).is_ok());

        match next_outbound(&mut script).await {
            Outbound::Frame(model::ClientFrame::Subscribe { data }) => {
                assert_eq!(data.channel.as_str(), "private-notifications-ADMIN");
                assert_eq!(
                    data.auth.map(|token| token.as_str().to_owned()),
                    Some("key:stub".to_owned())
                );
            }
            other => panic!("wanted a subscribe frame, but got {:?}", other),
        }
        assert_eq!(
            authenticator.calls(),
            vec![(
                model::SocketId::from("81607.152".to_owned()),
                ChannelName::private_for(&Role::Admin)
            )]
        );

        assert!(script
            .inbound
            .send(Ok(ack("private-notifications-ADMIN")))
            .is_ok());
        wait_for_status(&mut view, Status::is_connected).await;

        drop(auth_tx);
        assert!(matches!(worker.await, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_role_change_resubscribes_on_the_same_connection() {
        let (stream, mut script) = scripted();
        let connector = StubConnector::new([stream]);
        let (auth_tx, mut view, _events, _worker) = spawn(
            connector.clone(),
            StubAuthenticator::new([]),
            ReconnectPolicy::Never,
            Visibility::Private,
            admin(),
        );

        assert!(script.inbound.send(Ok(hello("81607.152"))).is_ok());
        assert!(matches!(
            next_outbound(&mut script).await,
            Outbound::Frame(model::ClientFrame::Subscribe { data })
                if data.channel.as_str() == "private-notifications-ADMIN"
        ));
        assert!(script
            .inbound
            .send(Ok(ack("private-notifications-ADMIN")))
            .is_ok());
        wait_for_status(&mut view, Status::is_connected).await;

        assert!(auth_tx
            .send(AuthContext::logged_in(
                Role::Staff,
                uuid!("6d9046e9-36b5-43a4-a09a-46170c2fcff4")
            ))
            .is_ok());

        // The old binding is released before the new one is announced, and
        // the transport connection is reused.
        assert!(matches!(
            next_outbound(&mut script).await,
            Outbound::Frame(model::ClientFrame::Unsubscribe { data })
                if data.channel.as_str() == "private-notifications-ADMIN"
        ));
        assert!(matches!(
            next_outbound(&mut script).await,
            Outbound::Frame(model::ClientFrame::Subscribe { data })
                if data.channel.as_str() == "private-notifications-STAFF"
        ));
        assert!(script
            .inbound
            .send(Ok(ack("private-notifications-STAFF")))
            .is_ok());
        wait_for_status(&mut view, |status| {
            status.is_connected()
                && status.channel.as_ref().map(ChannelName::as_str)
                    == Some("private-notifications-STAFF")
        })
        .await;
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_logout_tears_down_exactly_once() {
        let (stream, mut script) = scripted();
        let (auth_tx, mut view, _events, worker) = spawn(
            StubConnector::new([stream]),
            StubAuthenticator::new([]),
            ReconnectPolicy::Never,
            Visibility::Private,
            admin(),
        );

        assert!(script.inbound.send(Ok(hello("81607.152"))).is_ok());
        assert!(matches!(
            next_outbound(&mut script).await,
            Outbound::Frame(model::ClientFrame::Subscribe { .. })
        ));
        assert!(script
            .inbound
            .send(Ok(ack("private-notifications-ADMIN")))
            .is_ok());
        wait_for_status(&mut view, Status::is_connected).await;

        assert!(auth_tx.send(AuthContext::logged_out()).is_ok());
        assert!(matches!(
            next_outbound(&mut script).await,
            Outbound::Frame(model::ClientFrame::Unsubscribe { data })
                if data.channel.as_str() == "private-notifications-ADMIN"
        ));
        assert!(matches!(next_outbound(&mut script).await, Outbound::Closed));
        wait_for_status(&mut view, |status| *status == Status::idle()).await;

        // A second logout has nothing left to tear down.
        assert!(auth_tx.send(AuthContext::logged_out()).is_ok());
        time::sleep(Duration::from_millis(50)).await;
        assert!(script.outbound.try_recv().is_err());

        drop(auth_tx);
        assert!(matches!(worker.await, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_events_route_to_sink_and_store() {
        let (stream, mut script) = scripted();
        let (_auth_tx, mut view, mut events, _worker) = spawn(
            StubConnector::new([stream]),
            StubAuthenticator::new([]),
            ReconnectPolicy::Never,
            Visibility::Private,
            admin(),
        );

        assert!(script.inbound.send(Ok(hello("81607.152"))).is_ok());
        assert!(matches!(
            next_outbound(&mut script).await,
            Outbound::Frame(model::ClientFrame::Subscribe { .. })
        ));
        assert!(script
            .inbound
            .send(Ok(ack("private-notifications-ADMIN")))
            .is_ok());
        wait_for_status(&mut view, Status::is_connected).await;

        let channel = "private-notifications-ADMIN";
        assert!(script
            .inbound
            .send(Ok(notification(
                "import-order-created",
                channel,
                json!({"id": 7, "status": "CREATED"})
            )))
            .is_ok());
        assert!(script
            .inbound
            .send(Ok(notification(
                "import-order-counted-7",
                channel,
                json!({"id": 7, "status": "COUNTED"})
            )))
            .is_ok());

        // Unknown events, events for other channels, and housekeeping frames
        // are not delivered.
        assert!(script
            .inbound
            .send(Ok(notification("shipment-created", channel, json!({"id": 1}))))
            .is_ok());
        assert!(script
            .inbound
            .send(Ok(notification(
                "import-order-created",
                "private-notifications-STAFF",
                json!({"id": 9})
            )))
            .is_ok());
        assert!(script
            .inbound
            .send(Ok(server_frame(model::PING, None, None)))
            .is_ok());

        let first = next_event(&mut events).await;
        assert_eq!(first.name, "import-order-created");
        assert!(matches!(
            first.payload,
            Payload::ImportOrder(ref order) if order.id == 7
        ));

        let second = next_event(&mut events).await;
        assert_eq!(second.name, "import-order-counted-7");
        assert!(first.received_at <= second.received_at);

        // The ping was the last inbound frame, so once the pong shows up
        // everything before it has been routed.
        assert!(matches!(
            next_outbound(&mut script).await,
            Outbound::Frame(model::ClientFrame::Pong { .. })
        ));
        assert!(events.try_recv().is_err());

        // Only the latest record is retained.
        assert_eq!(
            view.latest().map(|record| record.name),
            Some("import-order-counted-7".to_owned())
        );
    }

    #[tokio::test]
    async fn test_authorization_failure_surfaces_as_error() {
        let (stream, mut script) = scripted();
        let authenticator = StubAuthenticator::new([Err(error::Authenticator::Rejected(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        )
        .into())]);
        let (_auth_tx, mut view, _events, _worker) = spawn(
            StubConnector::new([stream]),
            authenticator,
            ReconnectPolicy::Never,
            Visibility::Private,
            admin(),
        );

        assert!(script.inbound.send(Ok(hello("81607.152"))).is_ok());
        wait_for_status(&mut view, |status| status.phase == Phase::Error).await;
        assert!(view
            .connection_error()
            .map_or(false, |message| message.contains("500")));

        // No subscription was announced; the transport is closed instead.
        assert!(matches!(next_outbound(&mut script).await, Outbound::Closed));
        assert!(script.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unmapped_role_stays_idle() {
        let (stream, mut script) = scripted();
        let connector = StubConnector::new([stream]);
        let (auth_tx, mut view, _events, _worker) = spawn(
            connector.clone(),
            StubAuthenticator::new([]),
            ReconnectPolicy::Never,
            Visibility::Private,
            AuthContext::logged_in(
                Role::Unknown("SUPERVISOR".to_owned()),
                uuid!("6d9046e9-36b5-43a4-a09a-46170c2fcff4"),
            ),
        );

        wait_for_status(&mut view, |status| {
            status.phase == Phase::Idle && status.connection_error().is_some()
        })
        .await;
        assert_eq!(connector.connects(), 0);

        // A later session with a mapped role recovers normally.
        assert!(auth_tx.send(admin()).is_ok());
        wait_for_status(&mut view, |status| status.phase == Phase::Connecting).await;
        assert_eq!(connector.connects(), 1);
        assert!(script.inbound.send(Ok(hello("81607.152"))).is_ok());
        assert!(matches!(
            next_outbound(&mut script).await,
            Outbound::Frame(model::ClientFrame::Subscribe { .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_failure_retries_with_backoff() {
        let connector = StubConnector::new([]);
        let (_auth_tx, mut view, _events, _worker) = spawn(
            connector.clone(),
            StubAuthenticator::new([]),
            ReconnectPolicy::Backoff {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(50),
            },
            Visibility::Private,
            admin(),
        );

        wait_for_status(&mut view, |status| status.phase == Phase::Error).await;
        assert_eq!(connector.connects(), 1);

        let (stream, mut script) = scripted();
        connector.push(stream);

        wait_for_status(&mut view, |status| status.phase == Phase::Connecting).await;
        assert_eq!(connector.connects(), 2);
        assert!(script.inbound.send(Ok(hello("81607.153"))).is_ok());
        assert!(matches!(
            next_outbound(&mut script).await,
            Outbound::Frame(model::ClientFrame::Subscribe { .. })
        ));
        assert!(script
            .inbound
            .send(Ok(ack("private-notifications-ADMIN")))
            .is_ok());
        wait_for_status(&mut view, Status::is_connected).await;
    }

    #[tokio::test]
    async fn test_stale_grant_is_discarded_after_logout() {
        let (stream, mut script) = scripted();
        let authenticator = StubAuthenticator::new([]).with_delay(Duration::from_millis(100));
        let (auth_tx, mut view, _events, _worker) = spawn(
            StubConnector::new([stream]),
            authenticator.clone(),
            ReconnectPolicy::Never,
            Visibility::Private,
            admin(),
        );

        assert!(script.inbound.send(Ok(hello("81607.152"))).is_ok());

        // Wait for the authorization request to be in flight, then log out
        // before the grant comes back.
        let deadline = time::Instant::now() + WAIT;
        while authenticator.calls().is_empty() {
            assert!(time::Instant::now() < deadline, "authorization never started");
            time::sleep(Duration::from_millis(5)).await;
        }
        assert!(auth_tx.send(AuthContext::logged_out()).is_ok());

        // The grant resolves but must not be used: no subscribe frame goes
        // out, and the transport closes.
        match next_outbound(&mut script).await {
            Outbound::Closed => {}
            other => panic!(
                "wanted the transport to close without subscribing, but got {:?}",
                other
            ),
        }
        wait_for_status(&mut view, |status| *status == Status::idle()).await;
    }

    #[tokio::test]
    async fn test_public_visibility_skips_authorization() {
        let (stream, mut script) = scripted();
        let authenticator = StubAuthenticator::new([]);
        let (_auth_tx, mut view, _events, _worker) = spawn(
            StubConnector::new([stream]),
            authenticator.clone(),
            ReconnectPolicy::Never,
            Visibility::Public,
            admin(),
        );

        assert!(script.inbound.send(Ok(hello("81607.152"))).is_ok());
        match next_outbound(&mut script).await {
            Outbound::Frame(model::ClientFrame::Subscribe { data }) => {
                assert_eq!(data.channel.as_str(), "notifications-ADMIN");
                assert_eq!(data.auth, None);
            }
            other => panic!("wanted a subscribe frame, but got {:?}", other),
        }
        assert!(authenticator.calls().is_empty());

        assert!(script.inbound.send(Ok(ack("notifications-ADMIN"))).is_ok());
        wait_for_status(&mut view, |status| {
            status.is_connected()
                && status.channel.as_ref().map(ChannelName::as_str) == Some("notifications-ADMIN")
        })
        .await;
    }
}
