/// This module is responsible for interfacing with Kubernetes.
pub mod namespaces;
pub mod pods;
pub mod secrets;
pub mod service_accounts;

pub mod consts {
    /// Name of the image pull secret, and of the namespace the webhook itself runs in.
    pub const GCP_AUTH: &str = "gcp-auth";
    pub const NAMESPACE_SYSTEM: &str = "kube-system";

    pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
    pub const CREDENTIALS_VOLUME: &str = "gcp-creds";
    pub const CREDENTIALS_MOUNT_PATH: &str = "/google-app-creds.json";
    pub const CREDENTIALS_HOST_PATH: &str = "/var/lib/minikube/google_application_credentials.json";
    pub const PROJECT_FILE: &str = "/var/lib/minikube/google_cloud_project";

    /// Every variant of the project env var that GCP client libraries look at.
    pub const PROJECT_ALIASES: [&str; 5] = [
        "PROJECT_ID",
        "GCP_PROJECT",
        "GCLOUD_PROJECT",
        "GOOGLE_CLOUD_PROJECT",
        "CLOUDSDK_CORE_PROJECT",
    ];
}

/// Objects in the system namespace and in the webhook's own namespace are left alone.
pub fn skip_namespace(name: &str) -> bool {
    name == consts::NAMESPACE_SYSTEM || name == consts::GCP_AUTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_namespace() {
        assert!(skip_namespace("kube-system"));
        assert!(skip_namespace("gcp-auth"));
        assert!(!skip_namespace("default"));
        assert!(!skip_namespace(""));
    }
}
