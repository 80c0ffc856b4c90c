// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use log::debug;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use serde_with::{json::JsonString, serde_as};
use url::Url;

use crate::{
    channel::ChannelName,
    error::{self, Result},
    metadata,
    model::{AuthToken, SocketId},
};

/// Path of the dashboard endpoint that signs private-channel subscriptions.
pub(crate) const ENDPOINT_PATH: &str = "/pusher/auth";

/// Exchanges a connection's socket id and a channel name for a signed
/// subscription grant.
#[async_trait]
pub(crate) trait Authenticator: Send + Sync {
    async fn authorize(&self, socket_id: &SocketId, channel: &ChannelName) -> Result<AuthToken>;
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    socket_id: &'a SocketId,
    channel_name: &'a ChannelName,
}

/// Response envelope of the authorization endpoint. The grant under
/// `content` is itself a JSON document wrapped in a string, and the token the
/// server actually wants back is the `auth` key inside it.
#[derive(Debug, Deserialize)]
struct Envelope {
    content: Content,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct Content {
    #[serde_as(as = "JsonString")]
    auth: Grant,
}

#[derive(Debug, Deserialize)]
struct Grant {
    auth: String,
}

pub(crate) struct HttpAuthenticator {
    client: reqwest::Client,
    endpoint: Url,
    token: SecretString,
}

impl HttpAuthenticator {
    pub(crate) fn new(base: &Url, token: SecretString) -> Result<Self> {
        let endpoint = base.join(ENDPOINT_PATH).map_err(error::Authenticator::from)?;
        let client = reqwest::Client::builder()
            .user_agent(metadata::CLIENT_USER_AGENT.as_str())
            .build()
            .map_err(error::Authenticator::from)?;

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authorize(&self, socket_id: &SocketId, channel: &ChannelName) -> Result<AuthToken> {
        debug!(
            "Requesting authorization for {} on socket {}",
            channel, socket_id
        );

        let resp = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.token.expose_secret())
            .json(&Request {
                socket_id,
                channel_name: channel,
            })
            .send()
            .await
            .map_err(error::Authenticator::from)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(error::Authenticator::Rejected(status).into());
        }

        let body = resp.text().await.map_err(error::Authenticator::from)?;
        let envelope: Envelope =
            serde_json::from_str(&body).map_err(error::Authenticator::MalformedGrant)?;
        Ok(AuthToken::from(envelope.content.auth.auth))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::auth::Role;

    fn authenticator(server: &MockServer) -> Result<HttpAuthenticator> {
        let base = Url::parse(&server.base_url()).map_err(error::Authenticator::from)?;
        HttpAuthenticator::new(&base, SecretString::new("sesame".to_owned()))
    }

    #[tokio::test]
    async fn test_authorize_forwards_inner_token() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                let _ = when
                    .method(POST)
                    .path("/pusher/auth")
                    .header("authorization", "Bearer sesame")
                    .json_body(json!({
                        "socket_id": "81607.152",
                        "channel_name": "private-notifications-ADMIN",
                    }));
                let _ = then.status(200).json_body(json!({
                    "content": {"auth": r#"{"auth":"key:signature"}"#},
                }));
            })
            .await;

        let token = authenticator(&server)?
            .authorize(
                &SocketId::from("81607.152".to_owned()),
                &ChannelName::private_for(&Role::Admin),
            )
            .await?;
        assert_eq!(token.as_str(), "key:signature");

        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_authorize_rejected_by_endpoint() -> Result<()> {
        let server = MockServer::start_async().await;
        let _mock = server
            .mock_async(|when, then| {
                let _ = when.method(POST).path("/pusher/auth");
                let _ = then.status(403);
            })
            .await;

        let result = authenticator(&server)?
            .authorize(
                &SocketId::from("81607.152".to_owned()),
                &ChannelName::private_for(&Role::Staff),
            )
            .await;
        assert!(matches!(
            result,
            Err(error::Error::Authenticator(error::Authenticator::Rejected(
                status
            ))) if status == 403
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_authorize_with_malformed_grant() -> Result<()> {
        let server = MockServer::start_async().await;

        for body in [
            json!({"content": {"auth": "not json"}}),
            json!({"content": {"auth": r#"{"other":"key"}"#}}),
            json!({"unexpected": true}),
        ] {
            let server_body = body.clone();
            let _mock = server
                .mock_async(move |when, then| {
                    let _ = when.method(POST).path("/pusher/auth");
                    let _ = then.status(200).json_body(server_body);
                })
                .await;

            let result = authenticator(&server)?
                .authorize(
                    &SocketId::from("81607.152".to_owned()),
                    &ChannelName::private_for(&Role::Accounting),
                )
                .await;
            assert!(
                matches!(
                    result,
                    Err(error::Error::Authenticator(
                        error::Authenticator::MalformedGrant(_)
                    ))
                ),
                "body {} must not produce a grant",
                body
            );
        }
        Ok(())
    }
}
