//! HTTP reporter: posts partial and final coverage to a reporting service.

use crate::error::ReportError;
use async_trait::async_trait;
use base64::Engine;
use gantry_core::ids::{InstanceId, RunId};
use gantry_core::ports::{CoverageReporter, FinalizeRequest};
use gantry_core::run::PartialArtifact;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Base URL; `/partial` and `/finalize` are appended.
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    30
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            timeout_seconds: default_timeout(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Wire form of one artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactBody {
    pub instance: InstanceId,
    pub name: String,
    /// Base64 (standard alphabet).
    pub payload: String,
}

impl From<&PartialArtifact> for ArtifactBody {
    fn from(artifact: &PartialArtifact) -> Self {
        Self {
            instance: artifact.produced_by.clone(),
            name: artifact.name.clone(),
            payload: base64::engine::general_purpose::STANDARD.encode(&artifact.payload),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartialBody {
    pub run_id: RunId,
    #[serde(flatten)]
    pub artifact: ArtifactBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeBody {
    pub run_id: RunId,
    pub barrier: InstanceId,
    pub artifacts: Vec<ArtifactBody>,
    pub failed_contributors: Vec<InstanceId>,
}

pub struct WebhookReporter {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookReporter {
    pub fn new(config: WebhookConfig) -> Self {
        let timeout = config.timeout_seconds;
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout))
                .build()
                .unwrap_or_default(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), ReportError> {
        let url = self.endpoint(path);
        debug!(url = %url, "Posting coverage report");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ReportError::Rejected(format!(
                "{} returned {}: {}",
                url, status, text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CoverageReporter for WebhookReporter {
    async fn report_partial(&self, run_id: RunId, artifact: &PartialArtifact) -> gantry_core::Result<()> {
        let body = PartialBody {
            run_id,
            artifact: artifact.into(),
        };
        self.post("partial", &body).await?;
        debug!(instance = %artifact.produced_by, "Partial coverage submitted");
        Ok(())
    }

    async fn finalize(&self, request: &FinalizeRequest) -> gantry_core::Result<()> {
        let body = FinalizeBody {
            run_id: request.run_id,
            barrier: request.barrier.clone(),
            artifacts: request.artifacts.iter().map(ArtifactBody::from).collect(),
            failed_contributors: request.failed_contributors.clone(),
        };
        self.post("finalize", &body).await?;
        info!(barrier = %request.barrier, artifacts = body.artifacts.len(), "Coverage finalize accepted");
        Ok(())
    }
}
