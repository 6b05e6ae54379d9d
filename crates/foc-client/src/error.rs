use thiserror::Error;

/// Failures surfaced by the network layer. Every polling and dispatch path
/// catches these at its own boundary and converts them to a logged skip;
/// none of them propagate into the view.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported control plane scheme: {0}")]
    Scheme(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
