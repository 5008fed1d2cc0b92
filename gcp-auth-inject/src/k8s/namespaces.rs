//! Provisions the `gcp-auth` pull secret in every namespace.
//!
//! Namespaces are observed through a watch. The watch starts with a listing of every
//! existing namespace, which doubles as a backfill for namespaces created while the
//! reconciler was not running. After that only newly created namespaces are handled.
use std::collections::HashSet;
use std::fmt::Display;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;

use super::consts::GCP_AUTH;
use super::secrets::{pull_secret, SecretStore};
use super::skip_namespace;
use crate::credentials::CredentialSource;
use crate::ReconcileError;

/// How a namespace was left after reconciling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// System namespace or the webhook's own namespace.
    Excluded,
    SecretExists,
    SecretCreated,
    /// Someone else created the secret between our check and our create.
    LostRace,
}

pub struct NamespaceReconciler<S, C> {
    secrets: S,
    credentials: C,
}

impl<S, C> NamespaceReconciler<S, C>
where
    S: SecretStore,
    C: CredentialSource,
{
    pub fn new(secrets: S, credentials: C) -> Self {
        Self {
            secrets,
            credentials,
        }
    }

    /// Make sure `namespace` holds the pull secret, creating it if absent.
    pub async fn reconcile(&self, namespace: &str) -> Result<Outcome, ReconcileError> {
        if skip_namespace(namespace) {
            return Ok(Outcome::Excluded);
        }

        let names = self
            .secrets
            .secret_names(namespace)
            .await
            .map_err(|source| ReconcileError::ListSecrets {
                namespace: namespace.to_string(),
                source,
            })?;
        if names.iter().any(|name| name == GCP_AUTH) {
            return Ok(Outcome::SecretExists);
        }

        let token = self.credentials.access_token().await?;
        let secret = pull_secret(&token, self.credentials.registries())
            .map_err(ReconcileError::BuildSecret)?;

        match self.secrets.create(namespace, &secret).await {
            Ok(()) => Ok(Outcome::SecretCreated),
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(Outcome::LostRace),
            Err(source) => Err(ReconcileError::CreateSecret {
                namespace: namespace.to_string(),
                source,
            }),
        }
    }

    async fn observe(&self, namespace: &str) {
        match self.reconcile(namespace).await {
            Ok(Outcome::SecretCreated) => {
                tracing::info!("Created pull secret {} in namespace {}", GCP_AUTH, namespace)
            }
            Ok(outcome) => {
                tracing::debug!("Namespace {} left alone: {:?}", namespace, outcome)
            }
            Err(err) => tracing::error!("creating pull secret: {}", err),
        }
    }

    /// Consume namespace events until the stream ends.
    ///
    /// Failures are logged and never retried for the same event. A namespace is
    /// reconciled the first time it shows up; later updates to it are ignored until it
    /// is deleted or the watch re-lists.
    pub async fn run<St, E>(&self, events: St)
    where
        St: Stream<Item = Result<watcher::Event<Namespace>, E>>,
        E: Display,
    {
        let mut events = std::pin::pin!(events);
        let mut seen = HashSet::new();

        while let Some(event) = events.next().await {
            match event {
                Ok(watcher::Event::Init) => seen.clear(),
                Ok(watcher::Event::InitApply(ns)) | Ok(watcher::Event::Apply(ns)) => {
                    let name = ns.name_any();
                    if seen.insert(name.clone()) {
                        self.observe(&name).await;
                    }
                }
                Ok(watcher::Event::Delete(ns)) => {
                    seen.remove(&ns.name_any());
                }
                Ok(watcher::Event::InitDone) => {
                    tracing::debug!("Reconciled {} existing namespaces", seen.len())
                }
                Err(err) => tracing::error!("namespace watch: {}", err),
            }
        }

        tracing::info!("Namespace watch ended");
    }
}

/// Watch every namespace in the cluster and reconcile it.
pub async fn watch_namespaces<S, C>(client: kube::Client, reconciler: &NamespaceReconciler<S, C>)
where
    S: SecretStore,
    C: CredentialSource,
{
    let namespaces: kube::Api<Namespace> = kube::Api::all(client);
    let events = watcher(namespaces, watcher::Config::default()).default_backoff();

    tracing::info!("Watching namespaces");
    reconciler.run(events).await;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::Secret;
    use kube::core::{ErrorResponse, ObjectMeta};
    use serde_json::Value;

    use super::*;
    use crate::CredentialError;

    #[derive(Default)]
    struct FakeSecrets {
        secrets: Mutex<BTreeMap<String, Vec<Secret>>>,
        lists: AtomicUsize,
        fail_create_with: Option<u16>,
    }

    impl FakeSecrets {
        fn failing(code: u16) -> Self {
            Self {
                fail_create_with: Some(code),
                ..Default::default()
            }
        }

        fn in_namespace(&self, namespace: &str) -> Vec<Secret> {
            self.secrets
                .lock()
                .unwrap()
                .get(namespace)
                .cloned()
                .unwrap_or_default()
        }

        fn namespaces(&self) -> Vec<String> {
            self.secrets.lock().unwrap().keys().cloned().collect()
        }
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "rejected".to_string(),
            reason: (if code == 409 { "AlreadyExists" } else { "Forbidden" }).to_string(),
            code,
        })
    }

    #[async_trait]
    impl SecretStore for FakeSecrets {
        async fn secret_names(&self, namespace: &str) -> kube::Result<Vec<String>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .in_namespace(namespace)
                .iter()
                .map(|s| s.name_any())
                .collect())
        }

        async fn create(&self, namespace: &str, secret: &Secret) -> kube::Result<()> {
            if let Some(code) = self.fail_create_with {
                return Err(api_error(code));
            }
            self.secrets
                .lock()
                .unwrap()
                .entry(namespace.to_string())
                .or_default()
                .push(secret.clone());
            Ok(())
        }
    }

    struct FakeCredentials {
        registries: Vec<String>,
        tokens: AtomicUsize,
        fail: bool,
    }

    impl FakeCredentials {
        fn new(registries: &[&str]) -> Self {
            Self {
                registries: registries.iter().map(|r| r.to_string()).collect(),
                tokens: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl CredentialSource for FakeCredentials {
        async fn access_token(&self) -> Result<String, CredentialError> {
            if self.fail {
                return Err(CredentialError::Other("no credentials".to_string()));
            }
            let n = self.tokens.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{}", n))
        }

        fn registries(&self) -> &[String] {
            &self.registries
        }
    }

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn reconciler(
        secrets: FakeSecrets,
        credentials: FakeCredentials,
    ) -> NamespaceReconciler<FakeSecrets, FakeCredentials> {
        NamespaceReconciler::new(secrets, credentials)
    }

    #[tokio::test]
    async fn test_creates_secret_once() {
        let r = reconciler(
            FakeSecrets::default(),
            FakeCredentials::new(&["gcr.io", "us-docker.pkg.dev"]),
        );

        assert_eq!(r.reconcile("default").await.unwrap(), Outcome::SecretCreated);

        let secrets = r.secrets.in_namespace("default");
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].name_any(), "gcp-auth");
        let data = secrets[0].data.as_ref().unwrap();
        let dockercfg: Value = serde_json::from_slice(&data[".dockercfg"].0).unwrap();
        let auths = dockercfg.as_object().unwrap();
        assert_eq!(auths.len(), 2);
        assert_eq!(auths["https://gcr.io"]["password"], "token-0");
        assert_eq!(auths["https://us-docker.pkg.dev"]["password"], "token-0");

        // Running it again finds the secret and creates nothing.
        assert_eq!(r.reconcile("default").await.unwrap(), Outcome::SecretExists);
        assert_eq!(r.secrets.in_namespace("default").len(), 1);
        assert_eq!(r.credentials.tokens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_excluded_namespaces_are_not_touched() {
        let r = reconciler(FakeSecrets::default(), FakeCredentials::new(&["gcr.io"]));

        for ns in ["kube-system", "gcp-auth"] {
            assert_eq!(r.reconcile(ns).await.unwrap(), Outcome::Excluded);
        }
        assert_eq!(r.secrets.lists.load(Ordering::SeqCst), 0);
        assert!(r.secrets.namespaces().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_on_create_is_a_lost_race() {
        let r = reconciler(FakeSecrets::failing(409), FakeCredentials::new(&["gcr.io"]));

        assert_eq!(r.reconcile("default").await.unwrap(), Outcome::LostRace);
    }

    #[tokio::test]
    async fn test_other_create_failures_are_errors() {
        let r = reconciler(FakeSecrets::failing(403), FakeCredentials::new(&["gcr.io"]));

        assert!(matches!(
            r.reconcile("default").await,
            Err(ReconcileError::CreateSecret { namespace, .. }) if namespace == "default"
        ));
    }

    #[tokio::test]
    async fn test_token_failure_is_an_error() {
        let mut credentials = FakeCredentials::new(&["gcr.io"]);
        credentials.fail = true;
        let r = reconciler(FakeSecrets::default(), credentials);

        assert!(matches!(
            r.reconcile("default").await,
            Err(ReconcileError::Token(_))
        ));
        assert!(r.secrets.namespaces().is_empty());
    }

    #[tokio::test]
    async fn test_run_backfills_then_follows_creations() {
        let r = reconciler(FakeSecrets::default(), FakeCredentials::new(&["gcr.io"]));

        let events = futures::stream::iter(vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(namespace("default"))),
            Ok(watcher::Event::InitApply(namespace("kube-system"))),
            Ok(watcher::Event::InitApply(namespace("gcp-auth"))),
            Ok(watcher::Event::InitDone),
            Err("connection reset"),
            Ok(watcher::Event::Apply(namespace("team-a"))),
            // A label change on an existing namespace is not a creation.
            Ok(watcher::Event::Apply(namespace("team-a"))),
            Ok(watcher::Event::Delete(namespace("team-b"))),
        ]);

        r.run(events).await;

        assert_eq!(r.secrets.namespaces(), vec!["default", "team-a"]);
        assert_eq!(r.secrets.lists.load(Ordering::SeqCst), 2);
        assert_eq!(r.credentials.tokens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_reconciles_recreated_namespace() {
        let r = reconciler(FakeSecrets::default(), FakeCredentials::new(&["gcr.io"]));

        let events = futures::stream::iter(vec![
            Ok::<_, &str>(watcher::Event::Apply(namespace("team-a"))),
            Ok(watcher::Event::Delete(namespace("team-a"))),
            Ok(watcher::Event::Apply(namespace("team-a"))),
        ]);

        r.run(events).await;

        // The fake keeps the secret from the first incarnation, so the second pass finds it.
        assert_eq!(r.secrets.lists.load(Ordering::SeqCst), 2);
        assert_eq!(r.secrets.in_namespace("team-a").len(), 1);
    }

    #[tokio::test]
    async fn test_run_relist_reconciles_again() {
        let r = reconciler(FakeSecrets::default(), FakeCredentials::new(&["gcr.io"]));

        let events = futures::stream::iter(vec![
            Ok::<_, &str>(watcher::Event::Init),
            Ok(watcher::Event::InitApply(namespace("default"))),
            Ok(watcher::Event::InitDone),
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(namespace("default"))),
            Ok(watcher::Event::InitDone),
        ]);

        r.run(events).await;

        assert_eq!(r.secrets.lists.load(Ordering::SeqCst), 2);
        assert_eq!(r.credentials.tokens.load(Ordering::SeqCst), 1);
    }
}
