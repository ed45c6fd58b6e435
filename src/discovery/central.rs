//! Central directory client
//!
//! Speaks the directory's registration API. All calls degrade
//! gracefully: the fabric keeps working when the directory is absent.

use std::time::Duration;

use tracing::debug;

use crate::domain_types::AgentId;
use crate::error::DiscoveryError;
use crate::types::agent::{AgentProfile, AgentStatus};

/// HTTP client for the central agent directory
pub struct CentralDirectoryClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl CentralDirectoryClient {
    /// A client for a directory at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn map_error(&self, err: &reqwest::Error) -> DiscoveryError {
        if err.is_timeout() {
            DiscoveryError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            DiscoveryError::CentralUnavailable(err.to_string())
        }
    }

    /// Probes the directory; used during initialization
    pub async fn ping(&self) -> Result<(), DiscoveryError> {
        self.client
            .get(self.url("/api/registry/discover"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(&e))?
            .error_for_status()
            .map_err(|e| DiscoveryError::CentralUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Registers a profile with the directory
    pub async fn register(&self, profile: &AgentProfile) -> Result<(), DiscoveryError> {
        debug!(agent_id = %profile.agent_id, "registering with central directory");
        self.client
            .post(self.url("/api/registry/register"))
            .timeout(self.timeout)
            .json(profile)
            .send()
            .await
            .map_err(|e| self.map_error(&e))?
            .error_for_status()
            .map_err(|e| DiscoveryError::CentralUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Lists active agents known to the directory
    pub async fn discover(&self) -> Result<Vec<AgentProfile>, DiscoveryError> {
        let response = self
            .client
            .get(self.url("/api/registry/discover"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(&e))?
            .error_for_status()
            .map_err(|e| DiscoveryError::CentralUnavailable(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| DiscoveryError::CentralUnavailable(e.to_string()))
    }

    /// Fetches one agent's directory record
    pub async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<AgentProfile>, DiscoveryError> {
        let response = self
            .client
            .get(self.url(&format!("/api/registry/agents/{agent_id}")))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(&e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| DiscoveryError::CentralUnavailable(e.to_string()))?;
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| DiscoveryError::CentralUnavailable(e.to_string()))
    }

    /// Replaces one agent's directory record
    pub async fn update_agent(&self, profile: &AgentProfile) -> Result<(), DiscoveryError> {
        self.client
            .put(self.url(&format!("/api/registry/agents/{}", profile.agent_id)))
            .timeout(self.timeout)
            .json(profile)
            .send()
            .await
            .map_err(|e| self.map_error(&e))?
            .error_for_status()
            .map_err(|e| DiscoveryError::CentralUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Removes an agent from the directory
    pub async fn remove_agent(&self, agent_id: &AgentId) -> Result<(), DiscoveryError> {
        self.client
            .delete(self.url(&format!("/api/registry/agents/{agent_id}")))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(&e))?
            .error_for_status()
            .map_err(|e| DiscoveryError::CentralUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Updates an agent's status; used by the heartbeat
    pub async fn update_status(
        &self,
        agent_id: &AgentId,
        status: AgentStatus,
    ) -> Result<(), DiscoveryError> {
        self.client
            .put(self.url(&format!("/api/registry/agents/{agent_id}/status")))
            .timeout(self.timeout)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|e| self.map_error(&e))?
            .error_for_status()
            .map_err(|e| DiscoveryError::CentralUnavailable(e.to_string()))?;
        Ok(())
    }
}
