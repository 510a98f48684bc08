// Build probe: asks the build archive which build is the latest

use crate::errors::ProbeError;
use crate::models::BuildInfo;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Queried before a dispatch to decide whether there is anything new to test
#[async_trait]
pub trait BuildProbe: Send + Sync {
    async fn latest_build(&self, url: &str) -> Result<BuildInfo, ProbeError>;
}

/// Build-info document published next to nightly builds
#[derive(Debug, Deserialize)]
struct BuildInfoDocument {
    buildid: String,
    #[serde(default)]
    moz_source_stamp: Option<String>,
}

/// HTTP probe against a build-info JSON document
#[derive(Clone)]
pub struct ArchiveBuildProbe {
    client: reqwest::Client,
}

impl ArchiveBuildProbe {
    pub fn new() -> Result<Self, ProbeError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BuildProbe for ArchiveBuildProbe {
    #[instrument(skip(self))]
    async fn latest_build(&self, url: &str) -> Result<BuildInfo, ProbeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let document: BuildInfoDocument =
            response
                .json()
                .await
                .map_err(|e| ProbeError::InvalidResponse {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        if document.buildid.trim().is_empty() {
            return Err(ProbeError::InvalidResponse {
                url: url.to_string(),
                reason: "empty buildid".to_string(),
            });
        }

        debug!(build_id = %document.buildid, "Latest build found");

        Ok(BuildInfo {
            build_id: document.buildid,
            revision: document.moz_source_stamp,
            url: url.to_string(),
        })
    }
}
