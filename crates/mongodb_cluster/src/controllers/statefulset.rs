use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PodSecurityContext, PodSpec, PodTemplateSpec, SecretVolumeSource, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{
    api::{Patch, PatchParams},
    Api, Client, Resource, ResourceExt,
};
use tracing::info;

use crate::api::v1::mongodbcluster::{MongoDBCluster, MONGODB_PORT};
use crate::automation_config::AUTOMATION_CONFIG_KEY;
use crate::config::OperatorConfig;
use crate::tls::volumes::{TLS_CA_VOLUME_NAME, TLS_SECRET_VOLUME_NAME};
use crate::util::errors::{Error, Result, StdError};

pub const FIELD_MANAGER: &str = "mongodb-cluster-controller";

pub const AGENT_CONTAINER_NAME: &str = "mongodb-agent";
pub const MONGOD_CONTAINER_NAME: &str = "mongod";
pub const VERSION_UPGRADE_HOOK_CONTAINER_NAME: &str = "mongod-posthook";

const AUTOMATION_CONFIG_VOLUME_NAME: &str = "automation-config";
const HEALTH_STATUS_VOLUME_NAME: &str = "healthstatus";
const HOOKS_VOLUME_NAME: &str = "hooks";
const DATA_VOLUME_NAME: &str = "data-volume";

const AUTOMATION_CONFIG_MOUNT_PATH: &str = "/var/lib/automation/config";
const HEALTH_STATUS_MOUNT_PATH: &str = "/var/log/mongodb-mms-automation/healthstatus";
const HOOKS_MOUNT_PATH: &str = "/hooks";
const DATA_MOUNT_PATH: &str = "/data";
const DATA_VOLUME_SIZE: &str = "10G";

fn labels(cluster: &MongoDBCluster) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "mongodb".to_string()),
        ("app.kubernetes.io/instance".to_string(), cluster.name_any()),
        ("app.kubernetes.io/managed-by".to_string(), "mongodb-operator".to_string()),
    ])
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn agent_container(config: &OperatorConfig) -> Container {
    let command = format!(
        "agent/mongodb-agent -cluster={AUTOMATION_CONFIG_MOUNT_PATH}/{AUTOMATION_CONFIG_KEY} \
         -healthCheckFilePath={HEALTH_STATUS_MOUNT_PATH}/agent-health-status.json \
         -skipMongoStart -noDaemonize -useLocalMongoDbTools"
    );

    Container {
        name: AGENT_CONTAINER_NAME.to_string(),
        image: Some(config.agent_image.clone()),
        command: Some(vec!["/bin/bash".to_string(), "-c".to_string(), command]),
        volume_mounts: Some(vec![
            VolumeMount {
                read_only: Some(true),
                ..mount(AUTOMATION_CONFIG_VOLUME_NAME, AUTOMATION_CONFIG_MOUNT_PATH)
            },
            mount(HEALTH_STATUS_VOLUME_NAME, HEALTH_STATUS_MOUNT_PATH),
            mount(DATA_VOLUME_NAME, DATA_MOUNT_PATH),
        ]),
        ..Default::default()
    }
}

fn mongod_container(config: &OperatorConfig) -> Container {
    // the agent writes the process configuration once it has read the automation config
    let command = format!(
        "while ! [ -f {DATA_MOUNT_PATH}/automation-mongod.conf ]; do sleep 3 ; done ; sleep 2 ; \
         exec mongod -f {DATA_MOUNT_PATH}/automation-mongod.conf"
    );

    Container {
        name: MONGOD_CONTAINER_NAME.to_string(),
        image: Some(config.mongodb_image.clone()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), command]),
        ports: Some(vec![ContainerPort {
            name: Some("mongodb".to_string()),
            container_port: MONGODB_PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            mount(HEALTH_STATUS_VOLUME_NAME, HEALTH_STATUS_MOUNT_PATH),
            mount(HOOKS_VOLUME_NAME, HOOKS_MOUNT_PATH),
            mount(DATA_VOLUME_NAME, DATA_MOUNT_PATH),
        ]),
        ..Default::default()
    }
}

fn version_upgrade_hook_container(config: &OperatorConfig) -> Container {
    Container {
        name: VERSION_UPGRADE_HOOK_CONTAINER_NAME.to_string(),
        image: Some(config.version_upgrade_hook_image.clone()),
        command: Some(vec![
            "cp".to_string(),
            "version-upgrade-hook".to_string(),
            format!("{HOOKS_MOUNT_PATH}/version-upgrade"),
        ]),
        volume_mounts: Some(vec![mount(HOOKS_VOLUME_NAME, HOOKS_MOUNT_PATH)]),
        ..Default::default()
    }
}

/// Desired replica set statefulset, with the TLS volumes merged in when TLS is enabled.
pub fn desired_statefulset(cluster: &MongoDBCluster, config: &OperatorConfig) -> Result<StatefulSet> {
    let name = cluster.name_any();
    let namespace = cluster.namespace_or_err()?;
    let labels = labels(cluster);

    let mut pod_spec = PodSpec {
        security_context: Some(PodSecurityContext {
            run_as_user: Some(2000),
            run_as_non_root: Some(true),
            fs_group: Some(2000),
            ..Default::default()
        }),
        init_containers: Some(vec![version_upgrade_hook_container(config)]),
        containers: vec![agent_container(config), mongod_container(config)],
        volumes: Some(vec![
            Volume {
                name: AUTOMATION_CONFIG_VOLUME_NAME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(cluster.automation_config_secret_name()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            empty_dir(HEALTH_STATUS_VOLUME_NAME),
            empty_dir(HOOKS_VOLUME_NAME),
        ]),
        ..Default::default()
    };

    let tls = cluster.tls_descriptor()?;
    if tls.enabled {
        tls.volume_mount_plan()
            .apply_to(&mut pod_spec, &[AGENT_CONTAINER_NAME, MONGOD_CONTAINER_NAME]);
    }

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: cluster.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(cluster.service_name()),
            replicas: Some(cluster.spec.members),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(DATA_VOLUME_NAME.to_string()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(DATA_VOLUME_SIZE.to_string()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Headless service giving every member a stable DNS name.
pub fn desired_service(cluster: &MongoDBCluster) -> Result<Service> {
    Ok(Service {
        metadata: ObjectMeta {
            name: Some(cluster.service_name()),
            namespace: Some(cluster.namespace_or_err()?),
            labels: Some(labels(cluster)),
            owner_references: cluster.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(labels(cluster)),
            ports: Some(vec![ServicePort {
                name: Some("mongodb".to_string()),
                port: MONGODB_PORT,
                target_port: Some(IntOrString::Int(MONGODB_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// True once the controller has observed the latest template and every
/// member runs it and is ready.
pub fn is_rolled_out(statefulset: &StatefulSet, members: i32) -> bool {
    let generation = statefulset.metadata.generation.unwrap_or_default();
    let Some(status) = statefulset.status.as_ref() else {
        return false;
    };

    status.observed_generation.unwrap_or_default() >= generation
        && status.updated_replicas.unwrap_or_default() == members
        && status.ready_replicas.unwrap_or_default() == members
}

/// Whether the pod template mounts the TLS volumes.
pub fn carries_tls_material(statefulset: &StatefulSet) -> bool {
    let volumes = statefulset
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.volumes.as_ref());

    volumes.is_some_and(|volumes| {
        [TLS_CA_VOLUME_NAME, TLS_SECRET_VOLUME_NAME]
            .iter()
            .all(|name| volumes.iter().any(|v| v.name == *name))
    })
}

/// Server-side applies the service and the statefulset, returning the statefulset as stored.
pub async fn reconcile(client: &Client, cluster: &MongoDBCluster, config: &OperatorConfig) -> Result<StatefulSet> {
    let namespace = cluster.namespace_or_err()?;
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let service = desired_service(cluster)?;
    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    services
        .patch(&cluster.service_name(), &params, &Patch::Apply(&service))
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;

    let statefulset = desired_statefulset(cluster, config)?;
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let applied = statefulsets
        .patch(&cluster.name_any(), &params, &Patch::Apply(&statefulset))
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;

    info!(
        "Applied StatefulSet '{}' in namespace '{}' (generation {:?})",
        applied.name_any(),
        namespace,
        applied.meta().generation
    );
    Ok(applied)
}
