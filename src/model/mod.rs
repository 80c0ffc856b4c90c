// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod payload;

use std::{borrow::Cow, fmt};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{channel::ChannelName, error::Result};

/// Namespace for transport housekeeping events.
pub(crate) const SYSTEM_NAMESPACE: &str = "pusher:";

/// Namespace the server uses for acknowledgments it generates itself rather
/// than relaying. Clients fold it into [`SYSTEM_NAMESPACE`] before matching.
pub(crate) const INTERNAL_NAMESPACE: &str = "pusher_internal:";

pub(crate) const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub(crate) const SUBSCRIPTION_SUCCEEDED: &str = "pusher:subscription_succeeded";
pub(crate) const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
pub(crate) const PING: &str = "pusher:ping";
pub(crate) const PONG: &str = "pusher:pong";
pub(crate) const ERROR: &str = "pusher:error";

/// Rewrite an internal event name into the system namespace so matching only
/// ever has to deal with one prefix.
pub(crate) fn normalized(event: &str) -> Cow<'_, str> {
    match event.strip_prefix(INTERNAL_NAMESPACE) {
        Some(rest) => Cow::Owned(format!("{}{}", SYSTEM_NAMESPACE, rest)),
        None => Cow::Borrowed(event),
    }
}

/// Identifier the server assigns to a transport connection. Authorization
/// grants are bound to it, so it round-trips through the authenticator.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub(crate) struct SocketId(String);

impl SocketId {
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SocketId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed token returned by the authorization endpoint and forwarded to the
/// server with a private-channel subscription.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub(crate) struct AuthToken(String);

impl AuthToken {
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AuthToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Any frame the server can send. `data` is usually a JSON document wrapped
/// in a string, so consumers go through [`ServerFrame::data_value`] instead
/// of reading it directly.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub(crate) struct ServerFrame {
    pub(crate) event: String,
    #[serde(default)]
    pub(crate) channel: Option<String>,
    #[serde(default)]
    pub(crate) data: Option<Value>,
}

impl ServerFrame {
    /// The payload with one layer of string encoding peeled off. A string
    /// that does not itself parse as JSON is returned as-is.
    pub(crate) fn data_value(&self) -> Option<Value> {
        match self.data {
            Some(Value::String(ref encoded)) => match serde_json::from_str(encoded) {
                Ok(value) => Some(value),
                Err(_) => Some(Value::String(encoded.clone())),
            },
            Some(ref value) => Some(value.clone()),
            None => None,
        }
    }

    pub(crate) fn system_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data_value().unwrap_or(Value::Null)).map_err(Into::into)
    }
}

/// Payload of `pusher:connection_established`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub(crate) struct ConnectionEstablished {
    pub(crate) socket_id: SocketId,
    #[serde(default)]
    pub(crate) activity_timeout: Option<u64>,
}

/// Payload of `pusher:error`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub(crate) struct RemoteError {
    #[serde(default)]
    pub(crate) code: Option<u16>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

/// Any frame this client can send.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event")]
pub(crate) enum ClientFrame {
    #[serde(rename = "pusher:subscribe")]
    Subscribe { data: SubscribeData },
    #[serde(rename = "pusher:unsubscribe")]
    Unsubscribe { data: UnsubscribeData },
    #[serde(rename = "pusher:pong")]
    Pong { data: Value },
}

impl ClientFrame {
    pub(crate) fn pong() -> Self {
        Self::Pong {
            data: Value::Object(serde_json::Map::new()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct SubscribeData {
    pub(crate) channel: ChannelName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) auth: Option<AuthToken>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct UnsubscribeData {
    pub(crate) channel: ChannelName,
}
