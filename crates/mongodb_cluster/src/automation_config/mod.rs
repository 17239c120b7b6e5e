//! The cluster-wide automation config document pushed to every agent.
//!
//! Only the fields the operator owns are modelled. The document is assembled
//! by [`Builder`], which folds a list of [`Modification`]s over a base document
//! so that unrelated concerns (TLS, versions, ...) never need to know about
//! each other or about the order they run in.

use serde::{Deserialize, Serialize};

use crate::api::v1::mongodbcluster::MONGODB_PORT;
use crate::util::errors::{Result, StdError};

pub const AUTOMATION_CONFIG_KEY: &str = "cluster-config.json";

const DEFAULT_DOWNLOAD_BASE: &str = "/var/lib/mongodb-mms-automation";

/// A pure `document -> document` transformation.
pub type Modification = Box<dyn Fn(AutomationConfig) -> AutomationConfig + Send + Sync>;

#[cfg(test)]
pub fn noop() -> Modification {
    Box::new(|config| config)
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    pub version: i64,
    pub processes: Vec<Process>,
    pub replica_sets: Vec<ReplicaSet>,
    pub auth: Auth,
    pub tls: Tls,
    pub options: Options,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub name: String,
    #[serde(rename = "hostname")]
    pub host_name: String,
    #[serde(rename = "args2_6")]
    pub args26: Args26,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_compatibility_version: Option<String>,
    pub process_type: String,
    pub version: String,
    pub auth_schema_version: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Args26 {
    pub net: Net,
    pub replication: Replication,
    pub storage: Storage,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Net {
    pub port: i32,
    #[serde(default)]
    pub tls: MongoDbTls,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Replication {
    pub repl_set_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    pub db_path: String,
}

/// Per-process transport security enforcement level.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsMode {
    #[default]
    #[serde(rename = "disabled")]
    Disabled,
    #[serde(rename = "preferTLS")]
    Preferred,
    #[serde(rename = "requireTLS")]
    Required,
}

/// Per-process TLS settings (`net.tls`).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MongoDbTls {
    pub mode: TlsMode,
    #[serde(rename = "PEMKeyFile", default, skip_serializing_if = "String::is_empty")]
    pub pem_key_file: String,
    #[serde(rename = "CAFile", default, skip_serializing_if = "String::is_empty")]
    pub ca_file: String,
    #[serde(
        rename = "allowConnectionsWithoutCertificates",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub allow_connections_without_certificate: bool,
}

impl MongoDbTls {
    /// `disabled` iff every other field is empty; TLS modes never hard-require client certs.
    fn check(&self, process: &str) -> Result<()> {
        let empty = self.pem_key_file.is_empty() && self.ca_file.is_empty();
        let consistent = match self.mode {
            TlsMode::Disabled => empty && !self.allow_connections_without_certificate,
            TlsMode::Preferred | TlsMode::Required => {
                !self.pem_key_file.is_empty()
                    && !self.ca_file.is_empty()
                    && self.allow_connections_without_certificate
            }
        };
        if consistent {
            Ok(())
        } else {
            Err(StdError::InvariantViolation(format!(
                "process {process} has inconsistent TLS settings: {self:?}"
            ))
            .into())
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientCertificateMode {
    #[default]
    #[serde(rename = "OPTIONAL")]
    Optional,
    #[serde(rename = "REQUIRE")]
    Require,
}

/// Cluster-wide TLS settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    #[serde(rename = "CAFilePath", default)]
    pub ca_file_path: String,
    pub client_certificate_mode: ClientCertificateMode,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    #[serde(rename = "_id")]
    pub id: String,
    pub members: Vec<ReplicaSetMember>,
    pub protocol_version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetMember {
    #[serde(rename = "_id")]
    pub id: usize,
    pub host: String,
    pub priority: f32,
    pub arbiter_only: bool,
    pub votes: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Auth {
    pub disabled: bool,
}

impl Default for Auth {
    fn default() -> Self {
        Self { disabled: true }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    pub download_base: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
        }
    }
}

impl AutomationConfig {
    /// Checks the TLS consistency rules every pushed document must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.tls.client_certificate_mode != ClientCertificateMode::Optional {
            return Err(StdError::InvariantViolation(
                "clientCertificateMode must be OPTIONAL".to_string(),
            )
            .into());
        }

        for process in &self.processes {
            let tls = &process.args26.net.tls;
            tls.check(&process.name)?;

            if (tls.mode == TlsMode::Disabled) != self.tls.ca_file_path.is_empty() {
                return Err(StdError::InvariantViolation(format!(
                    "process {} runs TLS mode {:?} but cluster CAFilePath is {:?}",
                    process.name, tls.mode, self.tls.ca_file_path
                ))
                .into());
            }
        }

        Ok(())
    }
}

/// Assembles an [`AutomationConfig`] for one replica set.
#[derive(Default)]
pub struct Builder {
    name: String,
    hosts: Vec<String>,
    mongodb_version: String,
    feature_compatibility_version: Option<String>,
    previous: Option<AutomationConfig>,
    modifications: Vec<Modification>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replica set name, also the prefix of every process name.
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// One process is created per host, in order.
    pub fn set_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn set_mongodb_version(mut self, version: &str) -> Self {
        self.mongodb_version = version.to_string();
        self
    }

    pub fn set_feature_compatibility_version(mut self, fcv: Option<String>) -> Self {
        self.feature_compatibility_version = fcv;
        self
    }

    /// The currently deployed document; its version is kept when nothing changed.
    pub fn set_previous(mut self, previous: Option<AutomationConfig>) -> Self {
        self.previous = previous;
        self
    }

    pub fn add_modification(mut self, modification: Modification) -> Self {
        self.modifications.push(modification);
        self
    }

    pub fn build(self) -> Result<AutomationConfig> {
        let processes: Vec<Process> = self
            .hosts
            .iter()
            .enumerate()
            .map(|(i, host)| Process {
                name: format!("{}-{}", self.name, i),
                host_name: host.clone(),
                args26: Args26 {
                    net: Net {
                        port: MONGODB_PORT,
                        tls: MongoDbTls::default(),
                    },
                    replication: Replication {
                        repl_set_name: self.name.clone(),
                    },
                    storage: Storage {
                        db_path: "/data".to_string(),
                    },
                },
                feature_compatibility_version: self.feature_compatibility_version.clone(),
                process_type: "mongod".to_string(),
                version: self.mongodb_version.clone(),
                auth_schema_version: 5,
            })
            .collect();

        let replica_set = ReplicaSet {
            id: self.name.clone(),
            members: processes
                .iter()
                .enumerate()
                .map(|(i, p)| ReplicaSetMember {
                    id: i,
                    host: p.name.clone(),
                    priority: 1.0,
                    arbiter_only: false,
                    votes: 1,
                })
                .collect(),
            protocol_version: "1".to_string(),
        };

        let base = AutomationConfig {
            version: 0,
            processes,
            replica_sets: vec![replica_set],
            auth: Auth::default(),
            tls: Tls::default(),
            options: Options::default(),
        };

        let mut config = self
            .modifications
            .iter()
            .fold(base, |config, modification| modification(config));

        let version = match &self.previous {
            None => 1,
            Some(previous) => {
                config.version = previous.version;
                if &config == previous {
                    previous.version
                } else {
                    previous.version + 1
                }
            }
        };
        config.version = version;

        config.validate()?;
        Ok(config)
    }
}
