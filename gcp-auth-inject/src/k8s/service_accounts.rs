use json_patch::PatchOperation;
use jsonptr::Pointer;
use k8s_openapi::api::core::v1::ServiceAccount;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::consts::GCP_AUTH;
use super::skip_namespace;
use crate::patch::{add, append, contains_named};
use crate::Result;

/// When a service account gets the pull secret added to its `imagePullSecrets`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullSecretPolicy {
    /// Only once the account already lists the secret in its `secrets`, so that
    /// pods never reference a pull secret that does not exist yet.
    #[default]
    RequireAttached,
    /// On every service account.
    Always,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceAccountMutator {
    policy: PullSecretPolicy,
}

impl ServiceAccountMutator {
    pub fn new(policy: PullSecretPolicy) -> Self {
        Self { policy }
    }

    pub fn mutate(&self, sa: &ServiceAccount) -> Result<Vec<PatchOperation>> {
        let namespace = sa.metadata.namespace.as_deref().unwrap_or_default();
        if skip_namespace(namespace) {
            tracing::debug!(
                "Skipping service account {:?} in excluded namespace {:?}",
                sa.metadata.name,
                namespace
            );
            return Ok(Vec::new());
        }

        let pull_secrets = sa.image_pull_secrets.as_deref();
        if contains_named(pull_secrets, GCP_AUTH) {
            return Ok(Vec::new());
        }

        if self.policy == PullSecretPolicy::RequireAttached
            && !contains_named(sa.secrets.as_deref(), GCP_AUTH)
        {
            tracing::debug!(
                "Service account {:?} does not reference secret {} yet",
                sa.metadata.name,
                GCP_AUTH
            );
            return Ok(Vec::new());
        }

        Ok(vec![add(
            Pointer::new(["imagePullSecrets"]),
            append(pull_secrets, &[json!({ "name": GCP_AUTH })])?,
        )])
    }
}
