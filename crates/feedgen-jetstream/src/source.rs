//! Event sources: where the subscriber reads frames from.
//!
//! [`JetstreamSource`] is the production WebSocket source. Tests provide
//! scripted implementations of [`EventSource`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::{channel::mpsc, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use feedgen_core::error::FeedError;
use feedgen_core::types::POST_COLLECTION;

/// A stream of raw text frames from one connection.
///
/// Ends (`None`) when the server closes the connection; yields `Err` on a
/// transport failure.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, FeedError>> + Send>>;

/// Parameters of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Resume position; `None` starts at the live edge.
    pub cursor: Option<u64>,
    /// Collection NSIDs to receive.
    pub wanted_collections: Vec<String>,
}

impl ConnectRequest {
    /// A request for the post collection, resuming from `cursor` when it is
    /// a positive position.
    pub fn posts(cursor: Option<u64>) -> Self {
        Self {
            cursor: cursor.filter(|c| *c > 0),
            wanted_collections: vec![POST_COLLECTION.to_string()],
        }
    }

    /// Render the subscription URL against `base`.
    pub fn to_url(&self, base: &str) -> Result<Url, FeedError> {
        let mut url = Url::parse(base)
            .map_err(|e| FeedError::Config(format!("invalid firehose url '{base}': {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            for collection in &self.wanted_collections {
                query.append_pair("wantedCollections", collection);
            }
            if let Some(cursor) = self.cursor {
                query.append_pair("cursor", &cursor.to_string());
            }
        }
        Ok(url)
    }
}

/// Abstracts over the Jetstream transport.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open one connection. The subscriber calls this again after the
    /// returned stream ends or fails.
    async fn connect(&self, request: &ConnectRequest) -> Result<FrameStream, FeedError>;
}

// ─── JetstreamSource ─────────────────────────────────────────────────────────

/// Jetstream WebSocket source.
pub struct JetstreamSource {
    base_url: String,
}

impl JetstreamSource {
    /// `base_url` is the subscribe endpoint, e.g.
    /// `wss://jetstream1.us-east.bsky.network/subscribe`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl EventSource for JetstreamSource {
    async fn connect(&self, request: &ConnectRequest) -> Result<FrameStream, FeedError> {
        let url = request.to_url(&self.base_url)?;
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| FeedError::Transport(format!("connect {url}: {e}")))?;
        info!(url = %url, "connected to jetstream");

        let (tx, rx) = mpsc::channel::<Result<String, FeedError>>(512);
        tokio::spawn(pump_frames(ws, tx));
        Ok(Box::pin(rx))
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Forward text frames into `tx` until the socket closes, fails, or the
/// receiver is dropped.
async fn pump_frames(ws: WsStream, mut tx: mpsc::Sender<Result<String, FeedError>>) {
    let (mut write, mut read) = ws.split();

    while let Some(msg) = read.next().await {
        let frame = match msg {
            Ok(Message::Text(text)) => Ok(text),
            Ok(Message::Binary(bytes)) => String::from_utf8(bytes)
                .map_err(|e| FeedError::Decode(format!("binary frame is not utf-8: {e}"))),
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(frame)) => {
                info!(?frame, "jetstream closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "jetstream read failed");
                let _ = tx.send(Err(FeedError::Transport(e.to_string()))).await;
                break;
            }
        };
        if tx.send(frame).await.is_err() {
            // Subscriber went away.
            break;
        }
    }

    debug!("jetstream reader loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "wss://jetstream1.us-east.bsky.network/subscribe";

    #[test]
    fn live_edge_request_has_no_cursor() {
        let url = ConnectRequest::posts(None).to_url(BASE).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://jetstream1.us-east.bsky.network/subscribe?wantedCollections=app.bsky.feed.post"
        );
        assert_eq!(ConnectRequest::posts(Some(0)).cursor, None);
    }

    #[test]
    fn resume_request_carries_cursor() {
        let url = ConnectRequest::posts(Some(1_725_911_162_329_308))
            .to_url(BASE)
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("wantedCollections".into(), "app.bsky.feed.post".into()),
                ("cursor".into(), "1725911162329308".into()),
            ]
        );
    }

    #[test]
    fn bad_base_url_is_config_error() {
        let err = ConnectRequest::posts(None).to_url("not a url").unwrap_err();
        assert!(err.is_config());
    }
}
