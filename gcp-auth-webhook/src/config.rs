//! This module defines the configuration file.
//!
//! Every field is optional; an absent file or field means the built-in minikube
//! defaults.

use std::{fs, path::Path, path::PathBuf};

use gcp_auth_inject::{
    credentials::default_registries,
    k8s::{
        consts::{CREDENTIALS_HOST_PATH, PROJECT_FILE},
        pods::PodMutator,
        service_accounts::{PullSecretPolicy, ServiceAccountMutator},
    },
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Host file holding the application credentials, mounted into every pod.
    pub credentials_host_path: String,
    /// Host file holding the project id, if the host has one configured.
    pub project_file: PathBuf,
    pub pull_secret_policy: PullSecretPolicy,
    /// Registries the pull secret grants access to. Defaults to every GCR and
    /// Artifact Registry host.
    pub registries: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_host_path: CREDENTIALS_HOST_PATH.to_string(),
            project_file: PathBuf::from(PROJECT_FILE),
            pull_secret_policy: PullSecretPolicy::default(),
            registries: None,
        }
    }
}

impl Config {
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_file(file_path: &Path) -> anyhow::Result<Self> {
        let config_content = fs::read_to_string(file_path)?;
        Self::from_str(&config_content)
    }

    pub fn pod_mutator(&self) -> PodMutator {
        PodMutator::new(self.credentials_host_path.clone(), self.project_file.clone())
    }

    pub fn service_account_mutator(&self) -> ServiceAccountMutator {
        ServiceAccountMutator::new(self.pull_secret_policy)
    }

    pub fn registries(&self) -> Vec<String> {
        self.registries.clone().unwrap_or_else(default_registries)
    }
}
