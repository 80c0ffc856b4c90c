// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::Serialize;

use crate::auth::Role;

/// Marks a channel as requiring an authorization grant before the server
/// accepts a subscription to it.
pub(crate) const PRIVATE_PREFIX: &str = "private-";

/// Stem shared by every notification channel; the role name is appended
/// verbatim.
pub(crate) const CHANNEL_STEM: &str = "notifications-";

/// Name of a pub/sub channel as it appears on the wire.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub(crate) struct ChannelName(String);

impl ChannelName {
    pub(crate) fn private_for(role: &Role) -> Self {
        Self(format!("{}{}{}", PRIVATE_PREFIX, CHANNEL_STEM, role.as_str()))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn is_private(&self) -> bool {
        self.0.starts_with(PRIVATE_PREFIX)
    }

    /// The public form of this channel, which the server delivers without an
    /// authorization handshake.
    pub(crate) fn into_public(self) -> Self {
        match self.0.strip_prefix(PRIVATE_PREFIX) {
            Some(rest) => Self(rest.to_owned()),
            None => self,
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map a role onto its private notification channel. `None` means the role
/// has no channel and the caller must not subscribe to anything.
pub(crate) fn resolve(role: &Role) -> Option<ChannelName> {
    match *role {
        Role::Admin
        | Role::WarehouseManager
        | Role::Staff
        | Role::Department
        | Role::Accounting => Some(ChannelName::private_for(role)),
        Role::Unknown(_) => None,
    }
}
