// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name prefixes that select the payload schema for a family of
/// notifications.
pub(crate) const IMPORT_ORDER_FAMILY: &str = "import-order";
pub(crate) const EXPORT_REQUEST_FAMILY: &str = "export-request";
pub(crate) const STOCK_CHECK_FAMILY: &str = "stock-check";

/// Typed payload of a notification, keyed by the family of its classified
/// base name. Data that does not fit its family's schema is retained as
/// [`Payload::Malformed`] rather than dropped.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum Payload {
    ImportOrder(ImportOrder),
    ExportRequest(ExportRequest),
    StockCheck(StockCheck),
    Malformed(Malformed),
}

impl Payload {
    /// Decode the payload for an event whose classified base name is `base`.
    /// `data` is the frame payload with the string layer already removed.
    pub(crate) fn decode(base: &str, data: Option<&Value>) -> Self {
        let value = match data {
            Some(value) => value.clone(),
            None => {
                return Self::Malformed(Malformed {
                    detail: "event carried no payload".to_owned(),
                    raw: None,
                })
            }
        };

        let decoded = if base.starts_with(IMPORT_ORDER_FAMILY) {
            serde_json::from_value(value.clone()).map(Self::ImportOrder)
        } else if base.starts_with(EXPORT_REQUEST_FAMILY) {
            serde_json::from_value(value.clone()).map(Self::ExportRequest)
        } else if base.starts_with(STOCK_CHECK_FAMILY) {
            serde_json::from_value(value.clone()).map(Self::StockCheck)
        } else {
            return Self::Malformed(Malformed {
                detail: format!("no payload schema for event family of {:?}", base),
                raw: Some(value),
            });
        };

        match decoded {
            Ok(payload) => payload,
            Err(e) => Self::Malformed(Malformed {
                detail: e.to_string(),
                raw: Some(value),
            }),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Payload::ImportOrder(ref order) => {
                write!(f, "import order #{}", order.id)?;
                if let Some(ref status) = order.status {
                    write!(f, " [{}]", status)?;
                }
                Ok(())
            }
            Payload::ExportRequest(ref request) => {
                write!(f, "export request #{}", request.id)?;
                if let Some(ref status) = request.status {
                    write!(f, " [{}]", status)?;
                }
                Ok(())
            }
            Payload::StockCheck(ref check) => {
                write!(f, "stock check #{}", check.id)?;
                if let Some(ref status) = check.status {
                    write!(f, " [{}]", status)?;
                }
                Ok(())
            }
            Payload::Malformed(ref malformed) => {
                write!(f, "malformed payload ({})", malformed.detail)
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportOrder {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) provider: Option<String>,
    #[serde(default)]
    pub(crate) updated_by: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExportRequest {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) department: Option<String>,
    #[serde(default)]
    pub(crate) updated_by: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StockCheck {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) assigned_to: Option<String>,
    #[serde(default)]
    pub(crate) updated_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct Malformed {
    pub(crate) detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) raw: Option<Value>,
}

/// A notification as delivered to consumers: the event name exactly as
/// received, its decoded payload, and the local arrival time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct EventRecord {
    pub(crate) name: String,
    pub(crate) payload: Payload,
    pub(crate) received_at: DateTime<Utc>,
}

impl EventRecord {
    pub(crate) fn new(name: String, payload: Payload) -> Self {
        Self {
            name,
            payload,
            received_at: Utc::now(),
        }
    }
}
