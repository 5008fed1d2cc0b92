use kube::core::admission::SerializePatchError;
use thiserror::Error;

/// Errors surfaced while turning an admission request into a response.
#[derive(Error, Debug)]
pub enum Error {
    /// The request carried no payload.
    #[error("empty body")]
    EmptyBody,

    /// The envelope or the embedded object could not be parsed.
    #[error("could not decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    /// A patch value could not be serialized.
    #[error("could not build patch value: {0}")]
    PatchValue(#[source] serde_json::Error),

    #[error("could not attach patch: {0}")]
    SerializePatch(#[from] SerializePatchError),

    /// The response envelope could not be serialized.
    #[error("could not encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

impl Error {
    pub fn decode(what: &'static str, reason: impl ToString) -> Self {
        Error::Decode {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while provisioning the credential secret in a namespace.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("listing secrets in {namespace}: {source}")]
    ListSecrets {
        namespace: String,
        #[source]
        source: kube::Error,
    },

    #[error("fetching access token: {0}")]
    Token(#[from] CredentialError),

    #[error("building pull secret: {0}")]
    BuildSecret(#[source] serde_json::Error),

    #[error("creating secret in {namespace}: {source}")]
    CreateSecret {
        namespace: String,
        #[source]
        source: kube::Error,
    },
}

/// Errors from a credential source.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("GCP auth: {0}")]
    Gcp(#[from] gcp_auth::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
