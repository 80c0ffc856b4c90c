// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use log::{info, warn};
use secrecy::SecretString;
use tokio::{select, signal, sync::watch};
use uuid::Uuid;

use crate::{
    auth::{AuthContext, Claims, Role},
    error::{self, Result},
    feed::{
        authenticator::HttpAuthenticator, transport::WebSocketConnector, Feed, ReconnectPolicy,
        Visibility,
    },
    model::payload::EventRecord,
    sink,
    store::Phase,
    Globals,
};

/// Subscribe to the notification channel of the current session and stream
/// every recognized event to standard output.
#[derive(Debug, Parser)]
pub(crate) struct Command {
    /// Override the role claim of the session token.
    #[arg(long)]
    role: Option<Role>,

    /// Override the account id claim of the session token.
    #[arg(long)]
    account: Option<Uuid>,

    /// Subscribe to the public form of the channel, which needs no
    /// authorization grant.
    #[arg(long)]
    public: bool,

    /// Keep retrying with exponential backoff when the connection fails.
    #[arg(long)]
    reconnect: bool,

    /// Print each notification as a JSON object instead of a text line.
    #[arg(long)]
    json: bool,
}

impl Command {
    fn print(&self, record: &EventRecord) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!(
                "{} {} {}",
                record.received_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                record.name,
                record.payload
            );
        }
        Ok(())
    }
}

#[async_trait]
impl super::Command for Command {
    async fn execute(self, globals: Globals) -> Result<()> {
        if !self.public && globals.token.is_none() {
            return Err(error::Session::MissingToken.into());
        }

        let claims = globals
            .token
            .as_deref()
            .map(Claims::from_bearer_token)
            .transpose()?
            .unwrap_or_default();
        if claims.is_expired(Utc::now()) {
            warn!("The session token looks expired, so the server will probably refuse it");
        }

        let role = self
            .role
            .clone()
            .or_else(|| claims.role.clone())
            .ok_or(error::Session::MissingRole)?;
        let account = self
            .account
            .or(claims.account_id)
            .ok_or(error::Session::MissingAccount)?;

        let (auth_tx, auth_rx) = watch::channel(AuthContext::logged_in(role, account));

        let connector = WebSocketConnector::new(globals.ws_url.clone());
        let authenticator = HttpAuthenticator::new(
            &globals.api_url,
            SecretString::new(globals.token.clone().unwrap_or_default()),
        )?;

        let feed = Feed::new(connector, authenticator, auth_rx)
            .with_visibility(if self.public {
                Visibility::Public
            } else {
                Visibility::Private
            })
            .with_policy(if self.reconnect {
                ReconnectPolicy::BACKOFF
            } else {
                ReconnectPolicy::Never
            });

        let (event_sink, mut events) = sink::Channel::new();
        let (worker, mut view) = feed.open(event_sink);
        let worker_task = tokio::spawn(worker);

        let mut session = Some(auth_tx);
        let mut interrupt = Box::pin(signal::ctrl_c());
        let mut status_open = true;

        loop {
            select! {
                candidate = interrupt.as_mut(), if session.is_some() => {
                    candidate?;
                    info!("Interrupt received; closing the subscription");
                    let _ = session.take();
                }
                candidate = events.recv() => match candidate {
                    Some(record) => self.print(&record)?,
                    None => break,
                },
                candidate = view.status_changed(), if status_open => match candidate {
                    Ok(()) => {
                        let status = view.status();
                        match status.phase {
                            Phase::Error => warn!("{}", status),
                            Phase::Idle | Phase::Connecting | Phase::Subscribed => {
                                info!("{}", status);
                            }
                        }
                    }
                    Err(_) => status_open = false,
                },
            }
        }

        worker_task.await??;
        Ok(())
    }
}
