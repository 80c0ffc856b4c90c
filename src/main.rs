// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths)]
#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused,
    unused_lifetimes,
    unused_qualifications,
    unused_results,
    anonymous_parameters,
    deprecated_in_future,
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    missing_doc_code_examples,
    private_doc_tests,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::unseparated_literal_suffix,
    clippy::decimal_literal_representation,
    clippy::single_char_lifetime_names,
    clippy::fallible_impl_from,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::wildcard_enum_match_arm,
    clippy::deref_by_slicing,
    clippy::default_numeric_fallback,
    clippy::shadow_reuse,
    clippy::clone_on_ref_ptr,
    clippy::todo,
    clippy::string_add,
    clippy::use_debug,
    clippy::future_not_send
)]
#![cfg_attr(not(test), warn(clippy::panic_in_result_fn))]

mod auth;
mod catalog;
mod channel;
mod command;
mod error;
mod feed;
mod metadata;
mod model;
mod sink;
mod store;

use std::process;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use error::Result;
use log::error;
use url::Url;

#[derive(Debug, Subcommand)]
enum Command {
    Channels(command::channels::Command),
    Watch(command::watch::Command),
}

#[async_trait]
impl command::Command for Command {
    async fn execute(self, globals: Globals) -> Result<()> {
        match self {
            Self::Channels(cmd) => cmd.execute(globals).await,
            Self::Watch(cmd) => cmd.execute(globals).await,
        }
    }
}

/// Connection parameters shared by every subcommand.
#[derive(Clone, Debug, clap::Args)]
pub(crate) struct Globals {
    /// The WebSocket URL of the notification server's application endpoint.
    #[arg(long, env = "SKID_WS_URL", default_value = "ws://127.0.0.1:6001/app/dashboard", value_parser = Url::parse)]
    pub(crate) ws_url: Url,

    /// The base URL of the dashboard API that authorizes private channel
    /// subscriptions.
    #[arg(long, env = "SKID_API_URL", default_value = "http://127.0.0.1:5000", value_parser = Url::parse)]
    pub(crate) api_url: Url,

    /// The bearer token of the dashboard session.
    #[arg(long, env = "SKID_TOKEN", hide_env_values = true)]
    pub(crate) token: Option<String>,
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    globals: Globals,

    #[clap(subcommand)]
    command: Command,
}

async fn run(args: Args) -> Result<()> {
    command::Command::execute(args.command, args.globals).await
}

#[tokio::main]
async fn main() {
    let logger_env = env_logger::Env::new()
        .filter_or("SKID_LOG", "warn")
        .write_style("SKID_LOG_STYLE");
    env_logger::Builder::from_env(logger_env).init();

    if let Err(e) = run(Args::parse()).await {
        error!("We encountered an error: {}", e);
        process::exit(1);
    };
}
