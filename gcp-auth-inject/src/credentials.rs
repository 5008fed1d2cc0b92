//! Where the pull secret's access token comes from.
use std::sync::Arc;

use async_trait::async_trait;
use gcp_auth::TokenProvider;

use crate::CredentialError;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Container Registry hosts.
pub const GCR_REGISTRIES: &[&str] = &[
    "gcr.io",
    "us.gcr.io",
    "eu.gcr.io",
    "asia.gcr.io",
    "staging-k8s.gcr.io",
    "marketplace.gcr.io",
];

/// Artifact Registry hosts.
pub const AR_REGISTRIES: &[&str] = &[
    "northamerica-northeast1-docker.pkg.dev",
    "us-central1-docker.pkg.dev",
    "us-east1-docker.pkg.dev",
    "us-east4-docker.pkg.dev",
    "us-west1-docker.pkg.dev",
    "us-west2-docker.pkg.dev",
    "us-west3-docker.pkg.dev",
    "us-west4-docker.pkg.dev",
    "southamerica-east1-docker.pkg.dev",
    "europe-north1-docker.pkg.dev",
    "europe-west1-docker.pkg.dev",
    "europe-west2-docker.pkg.dev",
    "europe-west3-docker.pkg.dev",
    "europe-west4-docker.pkg.dev",
    "europe-west6-docker.pkg.dev",
    "asia-east1-docker.pkg.dev",
    "asia-east2-docker.pkg.dev",
    "asia-northeast1-docker.pkg.dev",
    "asia-northeast2-docker.pkg.dev",
    "asia-northeast3-docker.pkg.dev",
    "asia-south1-docker.pkg.dev",
    "asia-southeast1-docker.pkg.dev",
    "asia-southeast2-docker.pkg.dev",
    "australia-southeast1-docker.pkg.dev",
    "asia-docker.pkg.dev",
    "europe-docker.pkg.dev",
    "us-docker.pkg.dev",
];

pub fn default_registries() -> Vec<String> {
    GCR_REGISTRIES
        .iter()
        .chain(AR_REGISTRIES)
        .map(|r| r.to_string())
        .collect()
}

/// Supplies a bearer token and the registries it grants pull access to.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// A fresh access token. Called once per secret that gets created.
    async fn access_token(&self) -> Result<String, CredentialError>;

    fn registries(&self) -> &[String];
}

/// Application Default Credentials, i.e. wherever GCP would normally look.
pub struct GcpCredentials {
    provider: Arc<dyn TokenProvider>,
    registries: Vec<String>,
}

impl GcpCredentials {
    pub async fn discover(registries: Vec<String>) -> Result<Self, CredentialError> {
        let provider = gcp_auth::provider().await?;
        tracing::info!(
            "Found default credentials for {} registries",
            registries.len()
        );
        Ok(Self {
            provider,
            registries,
        })
    }
}

#[async_trait]
impl CredentialSource for GcpCredentials {
    async fn access_token(&self) -> Result<String, CredentialError> {
        let token = self.provider.token(&[CLOUD_PLATFORM_SCOPE]).await?;
        Ok(token.as_str().to_string())
    }

    fn registries(&self) -> &[String] {
        &self.registries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registries() {
        let registries = default_registries();

        assert_eq!(registries.len(), GCR_REGISTRIES.len() + AR_REGISTRIES.len());
        assert_eq!(registries[0], "gcr.io");
        assert!(registries.contains(&"us-docker.pkg.dev".to_string()));
    }
}
