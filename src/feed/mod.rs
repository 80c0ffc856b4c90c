// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod authenticator;
mod manager;
pub(crate) mod transport;

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use crate::{auth::AuthContext, catalog::Catalog, error::Result, sink::EventSink, store};

pub(crate) use manager::{ReconnectPolicy, Visibility};

/// A notification feed bound to one session. Opening it yields a worker
/// future that owns the transport connection and a [`store::View`] for
/// observing what the worker delivers.
pub(crate) struct Feed<C: transport::Connector, A: authenticator::Authenticator> {
    connector: C,
    authenticator: A,
    catalog: Catalog,
    policy: ReconnectPolicy,
    visibility: Visibility,
    auth_rx: watch::Receiver<AuthContext>,
}

impl<C: transport::Connector, A: authenticator::Authenticator> Feed<C, A> {
    pub(crate) fn new(connector: C, authenticator: A, auth_rx: watch::Receiver<AuthContext>) -> Self {
        Self {
            connector,
            authenticator,
            catalog: Catalog::default(),
            policy: ReconnectPolicy::Never,
            visibility: Visibility::Private,
            auth_rx,
        }
    }

    pub(crate) fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub(crate) fn open<S>(self, sink: S) -> (BoxFuture<'static, Result<()>>, store::View)
    where
        S: EventSink + 'static,
        C: 'static,
        C::Stream: 'static,
        A: 'static,
    {
        let (store, view) = store::channel();
        let worker = manager::Manager::new(self, sink, store);

        (Box::pin(worker.run()), view)
    }
}
