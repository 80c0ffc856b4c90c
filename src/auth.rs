// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{convert::Infallible, fmt, str};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{self, Result};

/// Functional category of a dashboard account. Unrecognized values are kept
/// verbatim so resolution can report them instead of failing the credential
/// parse.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(from = "String")]
pub(crate) enum Role {
    Admin,
    WarehouseManager,
    Staff,
    Department,
    Accounting,
    Unknown(String),
}

impl Role {
    pub(crate) const KNOWN: [Role; 5] = [
        Role::Admin,
        Role::WarehouseManager,
        Role::Staff,
        Role::Department,
        Role::Accounting,
    ];

    pub(crate) fn as_str(&self) -> &str {
        match *self {
            Role::Admin => "ADMIN",
            Role::WarehouseManager => "WAREHOUSE_MANAGER",
            Role::Staff => "STAFF",
            Role::Department => "DEPARTMENT",
            Role::Accounting => "ACCOUNTING",
            Role::Unknown(ref other) => other,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ADMIN" => Role::Admin,
            "WAREHOUSE_MANAGER" => Role::WarehouseManager,
            "STAFF" => Role::Staff,
            "DEPARTMENT" => Role::Department,
            "ACCOUNTING" => Role::Accounting,
            _ => Role::Unknown(value),
        }
    }
}

impl str::FromStr for Role {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Claims carried in a dashboard bearer token. The backend signs and verifies
/// the token; this client only reads the routing claims out of the payload.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct Claims {
    #[serde(default)]
    pub(crate) role: Option<Role>,
    #[serde(default, rename = "accountId")]
    pub(crate) account_id: Option<Uuid>,
    #[serde(default)]
    pub(crate) exp: Option<i64>,
}

impl Claims {
    pub(crate) fn from_bearer_token(token: &str) -> Result<Self> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(error::Session::Segments(token.split('.').count()).into()),
        };

        let decoded = base64::decode_config(payload, base64::URL_SAFE_NO_PAD)
            .map_err(error::Session::from)?;
        serde_json::from_slice(&decoded).map_err(|e| error::Session::Claims(e).into())
    }

    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.exp.map_or(false, |exp| exp <= now.timestamp())
    }
}

/// Session state the subscription reacts to. Changing any field and publishing
/// the new value is what drives subscribe, resubscribe, and teardown.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct AuthContext {
    pub(crate) role: Option<Role>,
    pub(crate) account_id: Option<Uuid>,
    pub(crate) is_authenticated: bool,
}

impl AuthContext {
    pub(crate) fn logged_in(role: Role, account_id: Uuid) -> Self {
        Self {
            role: Some(role),
            account_id: Some(account_id),
            is_authenticated: true,
        }
    }

    pub(crate) fn logged_out() -> Self {
        Self::default()
    }
}
