//! The admission webhook injects GCP credentials into new pods and service accounts,
//! and provisions the pull secret they reference in every namespace.
use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;
use config::Config;
use gcp_auth_inject::{
    credentials::GcpCredentials,
    k8s::{
        namespaces::{watch_namespaces, NamespaceReconciler},
        secrets::KubeSecretStore,
    },
};
use review::{ReviewDispatcher, ReviewKind};
use tracing::{info, Level};
use warp::{hyper::body::Bytes, Filter};

mod config;
mod review;

#[derive(Parser, Debug, Clone)]
#[command(name = "gcp-auth-webhook")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Path to the configuration file.
    /// Built-in defaults are used when omitted.
    #[arg(short, long)]
    config_file: Option<PathBuf>,
    /// The path to the TLS certificate.
    #[arg(long, default_value = "/etc/webhook/certs/cert")]
    tls_cert: PathBuf,
    /// The path to the TLS key.
    #[arg(long, default_value = "/etc/webhook/certs/key")]
    tls_key: PathBuf,
    /// The port to listen on.
    /// Default is 8443.
    #[arg(short, long, default_value = "8443")]
    port: u16,
    /// Do not provision the pull secret in namespaces.
    #[arg(long)]
    no_namespace_watch: bool,
}

/// Create the pull secret in every existing and future namespace.
async fn namespace_task(registries: Vec<String>) -> anyhow::Result<()> {
    let client = kube::Client::try_default()
        .await
        .context("getting cluster config")?;
    let credentials = GcpCredentials::discover(registries)
        .await
        .context("finding default credentials")?;

    let reconciler = NamespaceReconciler::new(KubeSecretStore::new(client.clone()), credentials);
    watch_namespaces(client, &reconciler).await;

    Ok(())
}

fn webhook_task(
    tls_cert: &Path,
    tls_key: &Path,
    port: u16,
    dispatcher: Arc<ReviewDispatcher>,
) -> impl Future<Output = ()> + 'static {
    let pods = dispatcher.clone();
    let mutate = warp::path!("mutate")
        .and(warp::body::bytes())
        .map(move |body: Bytes| pods.handle(ReviewKind::Pod, &body));

    let service_accounts = dispatcher;
    let mutate_sa = warp::path!("mutate" / "sa")
        .and(warp::body::bytes())
        .map(move |body: Bytes| service_accounts.handle(ReviewKind::ServiceAccount, &body));

    let routes = warp::post()
        .and(mutate.or(mutate_sa))
        .with(warp::trace::request());

    info!("Starting webhook server on port {}", port);
    let (_addr, fut) = warp::serve(routes)
        .tls()
        .cert_path(tls_cert)
        .key_path(tls_key)
        .bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install CTRL+C signal handler: {}", err);
            }
        });
    fut
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(Level::DEBUG)
        // builds the subscriber.
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Parse the CLI arguments
    let args = Args::try_parse()?;

    info!("Parsed CLI arguments: {:?}", args);

    // The configuration is read once; every request shares it.
    let config = match &args.config_file {
        Some(path) => Config::from_file(path).context("Failed to load configuration file")?,
        None => Config::default(),
    };
    info!("Loaded configuration: {:?}", config);

    let dispatcher = Arc::new(ReviewDispatcher::new(
        config.pod_mutator(),
        config.service_account_mutator(),
    ));

    if args.no_namespace_watch {
        info!("Namespace watch disabled");
    } else {
        let registries = config.registries();
        tokio::spawn(async move {
            if let Err(err) = namespace_task(registries).await {
                tracing::error!("Failed to watch namespaces: {:#}", err);
            }
        });
    }

    webhook_task(&args.tls_cert, &args.tls_key, args.port, dispatcher).await;

    info!("Exiting admission server");

    Ok(())
}
