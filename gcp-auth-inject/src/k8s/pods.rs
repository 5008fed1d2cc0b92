use std::path::PathBuf;

use json_patch::PatchOperation;
use jsonptr::Pointer;
use k8s_openapi::api::core::v1::{EnvVar, HostPathVolumeSource, Pod, Volume, VolumeMount};

use super::consts::{
    CREDENTIALS_HOST_PATH, CREDENTIALS_MOUNT_PATH, CREDENTIALS_VOLUME, ENV_CREDENTIALS,
    PROJECT_ALIASES, PROJECT_FILE,
};
use super::skip_namespace;
use crate::patch::{add, append, append_unique, container_pointer, needs_env_var};
use crate::{Error, Result};

/// Mounts the host's application credentials into new pods and points the
/// GCP client libraries at them.
#[derive(Debug, Clone)]
pub struct PodMutator {
    credentials_host_path: String,
    project_file: PathBuf,
}

impl Default for PodMutator {
    fn default() -> Self {
        Self::new(CREDENTIALS_HOST_PATH, PROJECT_FILE)
    }
}

impl PodMutator {
    pub fn new(credentials_host_path: impl Into<String>, project_file: impl Into<PathBuf>) -> Self {
        Self {
            credentials_host_path: credentials_host_path.into(),
            project_file: project_file.into(),
        }
    }

    fn credentials_volume(&self) -> Volume {
        Volume {
            name: CREDENTIALS_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: self.credentials_host_path.clone(),
                type_: Some("File".to_string()),
            }),
            ..Default::default()
        }
    }

    /// The project the host is configured for, if it was set up with one.
    fn project_id(&self) -> Option<String> {
        match std::fs::read_to_string(&self.project_file) {
            Ok(project) => Some(project),
            Err(err) => {
                tracing::trace!("No project file at {:?}: {}", self.project_file, err);
                None
            }
        }
    }

    /// Build the patch that wires credentials into the pod.
    ///
    /// Only the first container decides whether credentials and project env vars are
    /// missing, but the resulting env vars and mounts go into every container and
    /// init container. Volumes and mounts that already exist by name are left out.
    pub fn mutate(&self, pod: &Pod) -> Result<Vec<PatchOperation>> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        // Explicitly and silently exclude the system namespaces
        if skip_namespace(namespace) {
            tracing::debug!(
                "Skipping pod {:?} in excluded namespace {:?}",
                pod.metadata.name,
                namespace
            );
            return Ok(Vec::new());
        }

        let spec = pod
            .spec
            .as_ref()
            .ok_or_else(|| Error::decode("pod", "Pod spec is missing"))?;
        let first = spec.containers.first();

        let mut patches = Vec::new();
        let mut env_vars = Vec::new();

        let needs_creds = needs_env_var(first, ENV_CREDENTIALS);
        if needs_creds {
            env_vars.push(env_var(ENV_CREDENTIALS, CREDENTIALS_MOUNT_PATH));

            if let Some(volumes) =
                append_unique(spec.volumes.as_deref(), &self.credentials_volume())?
            {
                patches.push(add(Pointer::new(["spec", "volumes"]), volumes));
            }
        }

        if let Some(project) = self.project_id() {
            for alias in PROJECT_ALIASES {
                if needs_env_var(first, alias) {
                    env_vars.push(env_var(alias, &project));
                }
            }
        }

        if env_vars.is_empty() {
            return Ok(patches);
        }

        let mount = credentials_mount();
        let init_containers = spec.init_containers.as_deref().unwrap_or_default();
        for (field, containers) in [
            ("containers", spec.containers.as_slice()),
            ("initContainers", init_containers),
        ] {
            for (index, container) in containers.iter().enumerate() {
                if needs_creds {
                    if let Some(mounts) = append_unique(container.volume_mounts.as_deref(), &mount)?
                    {
                        patches.push(add(container_pointer(field, index, "volumeMounts"), mounts));
                    }
                }
                patches.push(add(
                    container_pointer(field, index, "env"),
                    append(container.env.as_deref(), &env_vars)?,
                ));
            }
        }

        Ok(patches)
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn credentials_mount() -> VolumeMount {
    VolumeMount {
        name: CREDENTIALS_VOLUME.to_string(),
        mount_path: CREDENTIALS_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}
