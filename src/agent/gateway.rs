use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{DetectionService, ProfileFetcher, RecordUploader};
use crate::config::settings::{AgentIdentity, GatewayConfig, GatewayPaths};
use crate::error::{AgentError, AgentResult};
use crate::models::detection::{DetectionMetrics, DetectionResult, Verdict};
use crate::models::metadata::MetadataSnapshot;
use crate::models::profile::Profile;
use crate::storage::sqlite::StoredRecord;

#[derive(Debug, Serialize)]
struct ProfileRequest<'a> {
    agent_id: &'a str,
    agent_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    analysis_metrics: Option<DetectionMetrics>,
    #[serde(default)]
    analysis_result: Option<String>,
}

#[derive(Debug, Serialize)]
struct SynchronizeRequest<'a> {
    agent_id: &'a str,
    agent_name: &'a str,
    records: &'a [StoredRecord],
}

/// HTTP client for the Whale Sentinel gateway.
pub struct GatewayClient {
    client: Client,
    base_url: String,
    auth_token: String,
    agent_id: String,
    agent_name: String,
    paths: GatewayPaths,
}

impl GatewayClient {
    pub fn new(identity: &AgentIdentity, config: &GatewayConfig) -> AgentResult<Self> {
        if !identity.verify_tls {
            warn!("TLS certificate verification disabled for gateway connections");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .danger_accept_invalid_certs(!identity.verify_tls)
            .build()?;

        Ok(Self {
            client,
            base_url: identity.gateway_api.trim_end_matches('/').to_string(),
            auth_token: identity.auth_token.clone(),
            agent_id: identity.agent_id.clone(),
            agent_name: identity.agent_name.clone(),
            paths: config.paths.clone(),
        })
    }

    /// The profile for this agent; `None` when the gateway has none yet.
    pub async fn fetch_profile(&self) -> AgentResult<Option<Profile>> {
        let body = ProfileRequest {
            agent_id: &self.agent_id,
            agent_name: &self.agent_name,
        };
        let text = self.post(&self.paths.profile, &body).await?;
        let profile: Option<Profile> = serde_json::from_str(&text)?;
        debug!(found = profile.is_some(), "profile fetched");
        Ok(profile)
    }

    /// Score a snapshot. A response missing either the metrics or the
    /// verdict yields `None`.
    pub async fn detect(&self, snapshot: &MetadataSnapshot) -> AgentResult<Option<DetectionResult>> {
        let text = self.post(&self.paths.detection, snapshot).await?;
        let response: DetectionResponse = serde_json::from_str(&text)?;
        match (response.analysis_metrics, response.analysis_result) {
            (Some(metrics), Some(label)) => {
                let verdict = Verdict::from(label);
                debug!(ip = snapshot.client_ip(), verdict = %verdict, "detection result received");
                Ok(Some(DetectionResult::new(metrics, verdict)))
            }
            _ => Ok(None),
        }
    }

    /// Upload a batch of stored records.
    pub async fn upload(&self, records: &[StoredRecord]) -> AgentResult<()> {
        let body = SynchronizeRequest {
            agent_id: &self.agent_id,
            agent_name: &self.agent_name,
            records,
        };
        self.post(&self.paths.synchronize, &body).await?;
        debug!(count = records.len(), "records uploaded");
        Ok(())
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> AgentResult<String> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(AgentError::GatewayStatus {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl DetectionService for GatewayClient {
    async fn detect(&self, snapshot: &MetadataSnapshot) -> AgentResult<Option<DetectionResult>> {
        GatewayClient::detect(self, snapshot).await
    }
}

#[async_trait]
impl ProfileFetcher for GatewayClient {
    async fn fetch_profile(&self) -> AgentResult<Option<Profile>> {
        GatewayClient::fetch_profile(self).await
    }
}

#[async_trait]
impl RecordUploader for GatewayClient {
    async fn upload(&self, records: &[StoredRecord]) -> AgentResult<()> {
        GatewayClient::upload(self, records).await
    }
}
