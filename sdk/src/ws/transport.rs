//! Transport layer.
//!
//! The session driver talks to the network through a [`Connector`], which
//! opens a text-frame duplex link. [`WebSocketConnector`] is the production
//! implementation over tokio-tungstenite.

use std::pin::Pin;

use futures_util::future::{self, BoxFuture};
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::error::WsError;

/// Outbound half of a link.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = WsError> + Send>>;

/// Inbound half of a link. The stream ends when the peer goes away.
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<String, WsError>> + Send>>;

/// An open text-frame link.
pub struct TransportLink {
    /// Outbound text frames.
    pub sink: FrameSink,
    /// Inbound text frames.
    pub source: FrameSource,
}

/// Opens transport links.
pub trait Connector: Send + Sync + 'static {
    /// Opens a link to `url`.
    fn open(&self, url: String) -> BoxFuture<'static, Result<TransportLink, WsError>>;
}

/// WebSocket connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(&self, url: String) -> BoxFuture<'static, Result<TransportLink, WsError>> {
        async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            debug!("WebSocket opened to {}", redact_token(&url));

            let (write, read) = ws_stream.split();

            let sink = write
                .sink_map_err(WsError::from)
                .with(|text: String| future::ready(Ok::<_, WsError>(Message::Text(text.into()))));

            let source = read.filter_map(|result| {
                future::ready(match result {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_string())),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => Some(Ok(text)),
                        Err(_) => {
                            warn!("Ignoring non UTF-8 binary frame ({} bytes)", bytes.len());
                            None
                        }
                    },
                    Ok(Message::Close(_)) => Some(Err(WsError::Closed)),
                    Ok(_) => None,
                    Err(e) => Some(Err(WsError::from(e))),
                })
            });

            Ok::<_, WsError>(TransportLink {
                sink: Box::pin(sink),
                source: Box::pin(source),
            })
        }
        .boxed()
    }
}

/// Strips the query string so credentials do not reach the logs.
pub(crate) fn redact_token(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
