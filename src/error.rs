// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{io, result};

use thiserror::Error;
use tokio::sync::watch;

use crate::auth;

pub(crate) type Result<T, E = Error> = result::Result<T, E>;

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),
    #[error("WebSocket error: {0}")]
    Websocket(tokio_tungstenite::tungstenite::Error),
    #[error("JSON format error: {0}")]
    Json(serde_json::Error),
    #[error("transport error: {0}")]
    Transport(#[from] Transport),
    #[error("channel authorization error: {0}")]
    Authenticator(#[from] Authenticator),
    #[error("subscription error: {0}")]
    Subscription(#[from] Subscription),
    #[error("session credential error: {0}")]
    Session(#[from] Session),
    #[error("internal communication error: {0}")]
    Internal(#[from] Internal),
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        // LINT: Deliberate fall-through that should catch future cases added to
        // the enum.
        #[allow(clippy::wildcard_enum_match_arm)]
        match value.classify() {
            serde_json::error::Category::Io => Self::Io(value.into()),
            _ => Self::Json(value),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Io(value.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        // LINT: Deliberate fall-through that should catch future cases added to
        // the enum.
        #[allow(clippy::wildcard_enum_match_arm)]
        match value {
            tokio_tungstenite::tungstenite::Error::Io(e) => Self::Io(e),
            _ => Self::Websocket(value),
        }
    }
}

#[derive(Error, Debug)]
pub(crate) enum Transport {
    #[error("server stream terminated during processing")]
    StreamEnded,
    #[error("server error {}: {message}", .code.map_or_else(|| "<unspecified>".to_owned(), |code| code.to_string()))]
    Remote { code: Option<u16>, message: String },
}

#[derive(Error, Debug)]
pub(crate) enum Authenticator {
    #[error("authorization endpoint URL is invalid: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("authorization request could not be completed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authorization endpoint rejected the request with status {0}")]
    Rejected(reqwest::StatusCode),
    #[error("authorization grant could not be parsed: {0}")]
    MalformedGrant(serde_json::Error),
}

#[derive(Error, Debug)]
pub(crate) enum Subscription {
    #[error(r#"channel "{}" was refused by the server: {message}"#, .channel.escape_default())]
    Refused { channel: String, message: String },
    #[error(r#"no notification channel is mapped for role "{}""#, .0.as_str().escape_default())]
    UnmappedRole(auth::Role),
}

#[derive(Error, Debug)]
pub(crate) enum Session {
    #[error("bearer token is not a JWT (expected 3 dot-separated segments, but got {0})")]
    Segments(usize),
    #[error("bearer token payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("bearer token claims could not be parsed: {0}")]
    Claims(serde_json::Error),
    #[error("session carries no role claim and no role override was given")]
    MissingRole,
    #[error("session carries no account id claim and no account override was given")]
    MissingAccount,
    #[error("a bearer token is required to authorize a private channel")]
    MissingToken,
}

#[derive(Error, Debug)]
pub(crate) enum Internal {
    #[error("channel is closed")]
    ChannelClosed,
}

impl From<watch::error::RecvError> for Internal {
    fn from(_: watch::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}
