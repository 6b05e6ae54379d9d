use foc_core::{Agent, EnvId, EnvironmentInfo};
use serde_json::Value;

use crate::error::ClientError;

/// Client for the control plane's HTTP API.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    base: String,
    http: reqwest::Client,
}

impl ControlPlane {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn route(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base)
    }

    async fn get_checked(&self, url: String) -> Result<reqwest::Response, ClientError> {
        let resp = self.http.get(&url).send().await?;
        check_status(resp, url)
    }

    async fn post_checked(&self, url: String) -> Result<reqwest::Response, ClientError> {
        let resp = self.http.post(&url).send().await?;
        check_status(resp, url)
    }

    /// The full agent roster.
    pub async fn list_agents(&self) -> Result<Vec<Agent>, ClientError> {
        let resp = self.get_checked(self.route("agents")).await?;
        Ok(resp.json().await?)
    }

    /// One roster entry by id.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent, ClientError> {
        let resp = self.get_checked(self.route(&format!("agents/{agent_id}"))).await?;
        Ok(resp.json().await?)
    }

    /// Ids of all known environments.
    pub async fn env_list(&self) -> Result<Vec<EnvId>, ClientError> {
        let resp = self.get_checked(self.route("env/list")).await?;
        Ok(resp.json().await?)
    }

    /// Metadata for one environment.
    pub async fn env_info(&self, env_id: &str) -> Result<EnvironmentInfo, ClientError> {
        let resp = self.get_checked(self.route(&format!("env/{env_id}/info"))).await?;
        Ok(resp.json().await?)
    }

    /// The environment's internal node map, passed through opaquely.
    pub async fn env_topology(&self, env_id: &str) -> Result<Value, ClientError> {
        let resp = self
            .get_checked(self.route(&format!("env/{env_id}/topology")))
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn kill_agent(&self, agent_id: &str) -> Result<(), ClientError> {
        self.post_checked(self.route(&format!("agents/{agent_id}/kill")))
            .await?;
        Ok(())
    }

    pub async fn agent_status(&self, agent_id: &str) -> Result<Value, ClientError> {
        let resp = self
            .get_checked(self.route(&format!("agents/{agent_id}/status")))
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn agent_tps(&self, agent_id: &str) -> Result<f64, ClientError> {
        let resp = self
            .get_checked(self.route(&format!("agents/{agent_id}/tps")))
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn set_log_level(&self, agent_id: &str, level: &str) -> Result<(), ClientError> {
        self.post_checked(self.route(&format!("agents/{agent_id}/log/{level}")))
            .await?;
        Ok(())
    }

    pub async fn set_node_verbosity(
        &self,
        agent_id: &str,
        verbosity: u8,
    ) -> Result<(), ClientError> {
        self.post_checked(self.route(&format!("agents/{agent_id}/node/log/{verbosity}")))
            .await?;
        Ok(())
    }
}

fn check_status(resp: reqwest::Response, url: String) -> Result<reqwest::Response, ClientError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(ClientError::Status {
            status: resp.status(),
            url,
        })
    }
}
