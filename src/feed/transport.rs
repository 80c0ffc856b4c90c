// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, client::IntoClientRequest as _},
    MaybeTlsStream,
};
use url::Url;

use crate::{
    error::{self, Result},
    metadata, model,
};

pub(crate) trait Sink:
    futures_util::Sink<model::ClientFrame, Error = error::Error> + Send + Sync + Unpin
{
}

impl<T: futures_util::Sink<model::ClientFrame, Error = error::Error> + Send + Sync + Unpin> Sink
    for T
{
}

pub(crate) trait Stream: Sink + futures_util::Stream<Item = Result<model::ServerFrame>> {}

impl<T: Sink + futures_util::Stream<Item = Result<model::ServerFrame>>> Stream for T {}

/// Opens a fresh connection to the notification server. The subscription
/// worker goes through this seam every time it needs a transport, so tests
/// can hand it scripted streams instead.
#[async_trait]
pub(crate) trait Connector: Send + Sync {
    type Stream: Stream;

    async fn connect(&self) -> Result<Self::Stream>;
}

pub(crate) struct WebSocket<S>(tokio_tungstenite::WebSocketStream<S>);

impl<S: AsyncRead + AsyncWrite + Unpin> futures_util::Stream for WebSocket<S> {
    type Item = Result<model::ServerFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return match Pin::new(&mut self.0).poll_next(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e.into()))),
                Poll::Ready(Some(Ok(msg))) => match msg {
                    tungstenite::Message::Text(text) => {
                        debug!("Received raw frame: {}", text);
                        Poll::Ready(Some(serde_json::from_str(&text).map_err(Into::into)))
                    }
                    tungstenite::Message::Binary(bytes) => {
                        Poll::Ready(Some(serde_json::from_slice(&bytes).map_err(Into::into)))
                    }
                    tungstenite::Message::Close(frame) => {
                        debug!("Received close frame: {:?}", frame);
                        Poll::Ready(None)
                    }
                    // Control frames are handled by the protocol layer.
                    tungstenite::Message::Ping(_)
                    | tungstenite::Message::Pong(_)
                    | tungstenite::Message::Frame(_) => continue,
                },
            };
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> futures_util::Sink<model::ClientFrame> for WebSocket<S> {
    type Error = error::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0).poll_ready(cx).map_err(Into::into)
    }

    fn start_send(mut self: Pin<&mut Self>, item: model::ClientFrame) -> Result<(), Self::Error> {
        debug!("Sending frame: {:?}", item);
        Pin::new(&mut self.0)
            .start_send(tungstenite::Message::Text(serde_json::to_string(&item)?))
            .map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0).poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0).poll_close(cx).map_err(Into::into)
    }
}

impl<S: AsyncRead + AsyncWrite + Send + Sync + Unpin> From<tokio_tungstenite::WebSocketStream<S>>
    for WebSocket<S>
{
    fn from(s: tokio_tungstenite::WebSocketStream<S>) -> Self {
        Self(s)
    }
}

/// Connects to the server's WebSocket endpoint, identifying this client and
/// its protocol revision in the query string.
pub(crate) struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub(crate) fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Stream = WebSocket<MaybeTlsStream<TcpStream>>;

    async fn connect(&self) -> Result<Self::Stream> {
        let mut url = self.url.clone();
        let _ = url
            .query_pairs_mut()
            .append_pair("protocol", &metadata::PROTOCOL_VERSION.to_string())
            .append_pair("client", &metadata::CLIENT_NAME)
            .append_pair("version", &metadata::CLIENT_VERSION);

        debug!("Connecting to {}", url);
        let req = url.as_str().into_client_request()?;
        let (stream, _) = connect_async(req).await?;
        Ok(stream.into())
    }
}
