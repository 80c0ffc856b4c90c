// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use clap::Parser;
use inflector::Inflector as _;
use tabled::{
    settings::{object::Segment, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::{auth::Role, channel, error::Result, Globals};

/// List the notification channel assigned to each dashboard role.
#[derive(Debug, Parser)]
pub(crate) struct Command {
    /// Show the public form of each channel instead of the private one.
    #[arg(long)]
    public: bool,
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Channel")]
    channel: String,
}

#[async_trait]
impl super::Command for Command {
    async fn execute(self, _globals: Globals) -> Result<()> {
        let rows = Role::KNOWN.iter().filter_map(|role| {
            channel::resolve(role).map(|resolved| Row {
                role: role.as_str().to_title_case(),
                channel: if self.public {
                    resolved.into_public().to_string()
                } else {
                    resolved.to_string()
                },
            })
        });

        println!(
            "{}",
            Table::new(rows)
                .with(Style::rounded())
                .with(Modify::new(Segment::all()).with(Alignment::left()))
        );
        Ok(())
    }
}
