use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, PodSpec, SecretVolumeSource, Volume, VolumeMount};

use super::{TLS_CA_MOUNT_PATH, TLS_OPERATOR_SECRET_MOUNT_PATH};

pub const TLS_CA_VOLUME_NAME: &str = "tls-ca";
pub const TLS_SECRET_VOLUME_NAME: &str = "tls-secret";

/// Volumes and mounts that make the TLS paths in the automation config resolve.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeMountPlan {
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
}

/// Derives the plan from the CA configmap and the operator-managed secret.
pub fn plan(ca_config_map: &str, operator_secret: &str) -> VolumeMountPlan {
    VolumeMountPlan {
        volumes: vec![
            Volume {
                name: TLS_CA_VOLUME_NAME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: ca_config_map.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: TLS_SECRET_VOLUME_NAME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(operator_secret.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ],
        mounts: vec![
            VolumeMount {
                name: TLS_CA_VOLUME_NAME.to_string(),
                mount_path: TLS_CA_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: TLS_SECRET_VOLUME_NAME.to_string(),
                mount_path: TLS_OPERATOR_SECRET_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ],
    }
}

impl VolumeMountPlan {
    /// Merges the plan into `pod_spec`, mounting into every container named in `containers`.
    ///
    /// Entries are matched by name, so applying the same plan twice is a no-op.
    pub fn apply_to(&self, pod_spec: &mut PodSpec, containers: &[&str]) {
        let volumes = pod_spec.volumes.get_or_insert_with(Vec::new);
        for volume in &self.volumes {
            match volumes.iter_mut().find(|v| v.name == volume.name) {
                Some(existing) => *existing = volume.clone(),
                None => volumes.push(volume.clone()),
            }
        }

        for container in pod_spec
            .containers
            .iter_mut()
            .filter(|c| containers.contains(&c.name.as_str()))
        {
            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            for mount in &self.mounts {
                match mounts.iter_mut().find(|m| m.name == mount.name) {
                    Some(existing) => *existing = mount.clone(),
                    None => mounts.push(mount.clone()),
                }
            }
        }
    }
}
