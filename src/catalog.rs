// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

/// Event names the dashboard publishes on its notification channels.
pub(crate) const STATIC_EVENT_NAMES: [&str; 19] = [
    "import-order-created",
    "import-order-counted",
    "import-order-confirmed",
    "import-order-cancelled",
    "import-order-extended",
    "import-order-completed",
    "import-order-stored",
    "import-order-ready-to-store",
    "export-request-created",
    "export-request-counted",
    "export-request-confirmed",
    "export-request-cancelled",
    "export-request-extended",
    "export-request-completed",
    "stock-check-created",
    "stock-check-assigned",
    "stock-check-counted",
    "stock-check-confirmed",
    "stock-check-completed",
];

/// Namespace the transport reserves for its own housekeeping events. Nothing
/// under it is ever an application notification.
pub(crate) const RESERVED_EVENT_PREFIX: &str = "pusher:";

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Classification {
    /// The name matches a known event exactly.
    Static,
    /// The name extends a known event with an entity-specific suffix, e.g. an
    /// order id appended to the base name.
    Dynamic { base: String },
    /// Not a notification; the caller must drop it.
    Ignored,
}

/// The set of event names a subscriber reacts to.
#[derive(Clone, Debug)]
pub(crate) struct Catalog {
    static_names: HashSet<String>,
    dynamic_bases: HashSet<String>,
}

impl Catalog {
    pub(crate) fn new<S, D>(static_names: S, dynamic_bases: D) -> Self
    where
        S: IntoIterator<Item = String>,
        D: IntoIterator<Item = String>,
    {
        Self {
            static_names: static_names.into_iter().collect(),
            dynamic_bases: dynamic_bases.into_iter().collect(),
        }
    }

    /// Classify an incoming event name. Static matches win over dynamic ones,
    /// and a dynamic match requires a non-empty suffix separated from the
    /// longest matching base by a single dash.
    pub(crate) fn classify(&self, name: &str) -> Classification {
        if name.starts_with(RESERVED_EVENT_PREFIX) {
            return Classification::Ignored;
        }

        if self.static_names.contains(name) {
            return Classification::Static;
        }

        let base = self
            .dynamic_bases
            .iter()
            .filter(|base| {
                name.strip_prefix(base.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .map_or(false, |suffix| !suffix.is_empty())
            })
            .max_by_key(|base| base.len());
        match base {
            Some(base) => Classification::Dynamic { base: base.clone() },
            None => Classification::Ignored,
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(
            STATIC_EVENT_NAMES.iter().map(|&name| name.to_owned()),
            STATIC_EVENT_NAMES.iter().map(|&name| name.to_owned()),
        )
    }
}
