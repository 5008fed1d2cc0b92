//! Injects Google Cloud credentials into workloads admitted to the cluster.
//!
//! The crate is split in two halves: the patch engine used by the mutating
//! admission webhook ([`k8s::pods`], [`k8s::service_accounts`], [`patch`]), and the
//! namespace reconciler that provisions the image pull secret those patches
//! reference ([`k8s::namespaces`]).
pub mod credentials;
pub mod error;
pub mod k8s;
pub mod patch;

pub use error::{CredentialError, Error, ReconcileError, Result};
