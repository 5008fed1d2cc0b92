use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{ListParams, PostParams};
use kube::core::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;

use super::consts::GCP_AUTH;

pub const DOCKERCFG_TYPE: &str = "kubernetes.io/dockercfg";
pub const DOCKERCFG_KEY: &str = ".dockercfg";

/// Username GCP registries expect when the password is an OAuth2 access token.
const OAUTH2_USERNAME: &str = "oauth2accesstoken";

/// Namespace scoped access to secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn secret_names(&self, namespace: &str) -> kube::Result<Vec<String>>;

    async fn create(&self, namespace: &str, secret: &Secret) -> kube::Result<()>;
}

/// [`SecretStore`] backed by the cluster API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: kube::Client,
}

impl KubeSecretStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> kube::Api<Secret> {
        kube::Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn secret_names(&self, namespace: &str) -> kube::Result<Vec<String>> {
        let secrets = self.api(namespace).list(&ListParams::default()).await?;
        Ok(secrets.items.iter().map(|s| s.name_any()).collect())
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> kube::Result<()> {
        self.api(namespace)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }
}

/// One registry's entry in the legacy `.dockercfg` format.
#[derive(Debug, Serialize)]
struct LegacyAuth<'a> {
    username: &'a str,
    password: &'a str,
    email: &'a str,
}

/// Build the `gcp-auth` pull secret granting `token` access to every registry.
pub fn pull_secret(token: &str, registries: &[String]) -> serde_json::Result<Secret> {
    let auths: BTreeMap<String, LegacyAuth> = registries
        .iter()
        .map(|registry| {
            (
                format!("https://{}", registry),
                LegacyAuth {
                    username: OAUTH2_USERNAME,
                    password: token,
                    email: "none",
                },
            )
        })
        .collect();

    let data = BTreeMap::from([(
        DOCKERCFG_KEY.to_string(),
        ByteString(serde_json::to_vec(&auths)?),
    )]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(GCP_AUTH.to_string()),
            ..Default::default()
        },
        data: Some(data),
        type_: Some(DOCKERCFG_TYPE.to_string()),
        ..Default::default()
    })
}
