use std::time::Duration;

use foc_core::{parse_height_body, parse_peer_metrics, Height, PeerMetricsSample};
use serde_json::Value;

use crate::error::ClientError;

/// Port of the HTTP service every agent exposes on its internal address.
pub const AGENT_SERVICE_PORT: u16 = 3030;

/// Upper bound on a single height query. Lagging nodes routinely blow
/// through this; the caller records the agent's height as unknown.
pub const HEIGHT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the direct per-agent side channel, bypassing the control
/// plane and talking straight to the agent's reported internal address.
#[derive(Debug, Clone, Default)]
pub struct AgentService {
    http: reqwest::Client,
}

impl AgentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The agent's latest chain height, a plain-text integer body.
    /// A non-numeric body is unknown, not an error.
    pub async fn latest_height(
        &self,
        internal_ip: &str,
        network: &str,
    ) -> Result<Height, ClientError> {
        let url = format!("http://{internal_ip}:{AGENT_SERVICE_PORT}/{network}/block/height/latest");
        let resp = self
            .http
            .get(&url)
            .timeout(HEIGHT_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status {
                status: resp.status(),
                url,
            });
        }
        let body = resp.text().await?;
        Ok(parse_height_body(&body))
    }

    /// The agent's peer list with kind tags, reduced to a per-kind count.
    pub async fn peer_metrics(
        &self,
        internal_ip: &str,
        network: &str,
    ) -> Result<PeerMetricsSample, ClientError> {
        let url = format!("http://{internal_ip}:{AGENT_SERVICE_PORT}/{network}/peers/all/metrics");
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status {
                status: resp.status(),
                url,
            });
        }
        let body: Value = resp.json().await?;
        parse_peer_metrics(&body)
            .ok_or_else(|| ClientError::Decode("peer metrics body is not an array".to_string()))
    }
}
