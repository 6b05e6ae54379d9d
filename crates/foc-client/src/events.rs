use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;
use url::Url;

use crate::error::ClientError;
use crate::ClientEvent;

/// Derive the event-subscription URL from the control-plane base address:
/// same origin and path, transport scheme swapped to the streaming
/// equivalent.
pub fn events_url(base: &str) -> Result<Url, ClientError> {
    let trimmed = base.trim_end_matches('/');
    let mut url = Url::parse(&format!("{trimmed}/api/v1/events"))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        other => return Err(ClientError::Scheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Scheme(scheme.to_string()))?;
    Ok(url)
}

/// Parse one inbound frame. A frame that is not valid JSON is dropped with
/// a logged warning and does not affect the channel's liveness.
pub fn parse_event_frame(text: &str) -> Option<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(event = "event_frame_parse_error", error = %err);
            None
        }
    }
}

/// Run the persistent event subscription: one connection for the lifetime
/// of the owning scope, inbound only. Parsed frames are forwarded in
/// arrival order. There is no reconnect on closure; the final message is
/// always `StreamClosed`.
pub async fn run_event_stream(url: Url, tx: mpsc::Sender<ClientEvent>) {
    let (mut ws, _) = match connect_async(url.clone()).await {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "event_stream_connect_error", url = %url, error = %err);
            let _ = tx.send(ClientEvent::StreamClosed).await;
            return;
        }
    };

    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(value) = parse_event_frame(&text) {
                    if tx.send(ClientEvent::StreamFrame(value)).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(event = "event_stream_error", error = %err);
                break;
            }
        }
    }

    let _ = ws.close(None).await;
    let _ = tx.send(ClientEvent::StreamClosed).await;
}
