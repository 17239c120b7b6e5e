use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::api::v1::mongodbcluster::MongoDBCluster;
use crate::automation_config::{AutomationConfig, Builder, Modification, AUTOMATION_CONFIG_KEY};
use crate::store::ObjectStore;
use crate::util::errors::{Result, StdError};

fn read_previous(secret: &Secret) -> Result<Option<AutomationConfig>> {
    let Some(raw) = secret.data.as_ref().and_then(|data| data.get(AUTOMATION_CONFIG_KEY)) else {
        return Ok(None);
    };
    let config = serde_json::from_slice(&raw.0).map_err(StdError::JsonSerializationError)?;
    Ok(Some(config))
}

/// Builds the automation config for `cluster` with `tls` applied and stores it
/// in the `<name>-config` secret the agents read from.
///
/// The secret is only written when the document changed.
pub async fn reconcile<S: ObjectStore>(
    store: &S,
    cluster: &MongoDBCluster,
    tls: Modification,
) -> Result<AutomationConfig> {
    let namespace = cluster.namespace_or_err()?;
    let secret_name = cluster.automation_config_secret_name();

    let existing: Option<Secret> = store
        .get(&namespace, &secret_name)
        .await
        .map_err(StdError::StoreReadFailed)?;
    let previous = match &existing {
        Some(secret) => read_previous(secret)?,
        None => None,
    };

    let config = Builder::new()
        .set_name(&cluster.name_any())
        .set_hosts(cluster.hosts()?)
        .set_mongodb_version(&cluster.spec.version)
        .set_feature_compatibility_version(cluster.spec.feature_compatibility_version.clone())
        .set_previous(previous.clone())
        .add_modification(tls)
        .build()?;

    if previous.as_ref() == Some(&config) {
        debug!("Automation config '{}' is up to date (version {})", secret_name, config.version);
        return Ok(config);
    }

    let payload = serde_json::to_vec(&config).map_err(StdError::JsonSerializationError)?;
    let data = BTreeMap::from([(AUTOMATION_CONFIG_KEY.to_string(), ByteString(payload))]);

    match existing {
        Some(mut secret) => {
            secret.data = Some(data);
            store.update(&secret).await.map_err(StdError::StoreWriteFailed)?;
        }
        None => {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(secret_name.clone()),
                    namespace: Some(namespace),
                    owner_references: cluster.controller_owner_ref(&()).map(|oref| vec![oref]),
                    ..Default::default()
                },
                data: Some(data),
                type_: Some("Opaque".to_string()),
                ..Default::default()
            };
            store.create(&secret).await.map_err(StdError::StoreWriteFailed)?;
        }
    }

    info!("Stored automation config '{}' version {}", secret_name, config.version);
    Ok(config)
}
