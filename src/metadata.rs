// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;

/// Version of the channel wire protocol this client speaks.
pub(crate) const PROTOCOL_VERSION: u8 = 7;

pub(crate) static CLIENT_NAME: Lazy<String> =
    Lazy::new(|| option_env!("CARGO_PKG_NAME").unwrap_or("skid").to_owned());
pub(crate) static CLIENT_VERSION: Lazy<String> =
    Lazy::new(|| option_env!("CARGO_PKG_VERSION").unwrap_or("0.0.0").to_owned());
pub(crate) static CLIENT_USER_AGENT: Lazy<String> =
    Lazy::new(|| format!("{}/{}", *CLIENT_NAME, *CLIENT_VERSION));
