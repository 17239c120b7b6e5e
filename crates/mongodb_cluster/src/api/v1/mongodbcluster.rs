use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1::conditions_schema;
use crate::tls::TlsDescriptor;
use crate::util::errors::{Result, StdError};

pub static MONGODB_CLUSTER_FINALIZER: &str = "mongodb-cluster.mongodb.molnett.org";

/// Set once every member carries the TLS material; gates the switch away from `disabled`.
pub const TLS_ROLLED_OUT_ANNOTATION: &str = "mongodb.molnett.org/tls-rolled-out";

pub const MONGODB_PORT: i32 = 27017;

/// Generate the Kubernetes wrapper struct `MongoDBCluster` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(kind = "MongoDBCluster", group = "mongodb.molnett.org", version = "v1", namespaced)]
#[kube(status = "MongoDBClusterStatus", shortname = "mdbc")]
#[serde(rename_all = "camelCase")]
pub struct MongoDBClusterSpec {
    /// Number of replica set members
    #[serde(default = "default_members")]
    pub members: i32,
    /// MongoDB server version, e.g. `6.0.5`
    #[serde(default = "default_version")]
    pub version: String,
    pub feature_compatibility_version: Option<String>,

    #[serde(default)]
    pub security: Security,
}

fn default_members() -> i32 {
    3
}
fn default_version() -> String {
    "6.0.5".to_string()
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct Security {
    #[serde(default)]
    pub tls: TlsSpec,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Accept plain connections alongside TLS ones once the rollout is complete
    #[serde(default)]
    pub optional: bool,
    /// Secret holding `tls.crt` and `tls.key`
    #[serde(default)]
    pub certificate_key_secret_ref: LocalRef,
    /// ConfigMap holding `ca.crt`
    #[serde(default)]
    pub ca_config_map_ref: LocalRef,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
pub struct LocalRef {
    #[serde(default)]
    pub name: String,
}

/// The status object of `MongoDBCluster`
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBClusterStatus {
    #[schemars(schema_with = "conditions_schema")]
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub phase: Option<String>,
    pub current_mongodb_members: Option<i32>,
    /// Version of the last automation config pushed to the members
    pub version: Option<i64>,
    pub message: Option<String>,
}

impl MongoDBCluster {
    pub fn namespace_or_err(&self) -> Result<String> {
        self.namespace()
            .ok_or_else(|| StdError::MetadataMissing("MongoDBCluster has no namespace".to_string()).into())
    }

    pub fn tls_rolled_out(&self) -> bool {
        self.annotations()
            .get(TLS_ROLLED_OUT_ANNOTATION)
            .is_some_and(|v| v == "true")
    }

    /// Read-only view of everything the TLS core needs from this object.
    pub fn tls_descriptor(&self) -> Result<TlsDescriptor> {
        let tls = &self.spec.security.tls;
        Ok(TlsDescriptor {
            name: self.name_any(),
            namespace: self.namespace_or_err()?,
            enabled: tls.enabled,
            optional: tls.optional,
            certificate_key_secret: tls.certificate_key_secret_ref.name.clone(),
            ca_config_map: tls.ca_config_map_ref.name.clone(),
            rollout_complete: self.tls_rolled_out(),
            operator_secret: self.tls_operator_secret_name(),
            owner: self.controller_owner_ref(&()),
        })
    }

    pub fn tls_operator_secret_name(&self) -> String {
        format!("{}-server-certificate-key", self.name_any())
    }

    pub fn automation_config_secret_name(&self) -> String {
        format!("{}-config", self.name_any())
    }

    pub fn service_name(&self) -> String {
        format!("{}-svc", self.name_any())
    }

    /// Stable DNS names of the members, in ordinal order.
    pub fn hosts(&self) -> Result<Vec<String>> {
        let namespace = self.namespace_or_err()?;
        Ok((0..self.spec.members)
            .map(|i| {
                format!(
                    "{}-{}.{}.{}.svc.cluster.local",
                    self.name_any(),
                    i,
                    self.service_name(),
                    namespace
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn cluster(annotations: Option<BTreeMap<String, String>>) -> MongoDBCluster {
        MongoDBCluster {
            metadata: ObjectMeta {
                name: Some("example".to_string()),
                namespace: Some("db".to_string()),
                annotations,
                ..Default::default()
            },
            spec: MongoDBClusterSpec {
                members: 2,
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn rollout_marker_requires_literal_true() {
        assert!(!cluster(None).tls_rolled_out());

        let mut annotations = BTreeMap::new();
        annotations.insert(TLS_ROLLED_OUT_ANNOTATION.to_string(), "false".to_string());
        assert!(!cluster(Some(annotations.clone())).tls_rolled_out());

        annotations.insert(TLS_ROLLED_OUT_ANNOTATION.to_string(), "true".to_string());
        assert!(cluster(Some(annotations)).tls_rolled_out());
    }

    #[test]
    fn derived_names() {
        let mdb = cluster(None);
        assert_eq!(mdb.tls_operator_secret_name(), "example-server-certificate-key");
        assert_eq!(mdb.automation_config_secret_name(), "example-config");
        assert_eq!(
            mdb.hosts().unwrap(),
            vec![
                "example-0.example-svc.db.svc.cluster.local",
                "example-1.example-svc.db.svc.cluster.local",
            ]
        );
    }

    #[test]
    fn spec_defaults_apply_on_deserialize() {
        let spec: MongoDBClusterSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.members, 3);
        assert_eq!(spec.version, "6.0.5");
        assert!(!spec.security.tls.enabled);
        assert!(!spec.security.tls.optional);
    }
}
