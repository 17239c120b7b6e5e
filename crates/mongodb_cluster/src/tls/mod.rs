//! TLS activation for a replica set.
//!
//! Turning TLS on happens in two phases. First the certificate material is
//! copied into an operator-owned secret and mounted into every member while
//! the members keep running with TLS disabled. Once the rollout marker is set
//! the automation config switches every process to `preferTLS` or
//! `requireTLS` in one step.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;

use crate::automation_config::Modification;
use crate::store::ObjectStore;
use crate::util::errors::Result;

pub mod material;
pub mod patch;
pub mod rollout;
pub mod volumes;

pub const TLS_CA_MOUNT_PATH: &str = "/mongodb-automation/tls/ca/";
pub const TLS_OPERATOR_SECRET_MOUNT_PATH: &str = "/mongodb-automation/tls/";
pub const TLS_CA_CERT_NAME: &str = "ca.crt";
pub const TLS_SECRET_CERT_NAME: &str = "tls.crt";
pub const TLS_SECRET_KEY_NAME: &str = "tls.key";

/// Read-only view of a cluster's TLS settings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TlsDescriptor {
    pub name: String,
    pub namespace: String,
    pub enabled: bool,
    pub optional: bool,
    pub certificate_key_secret: String,
    pub ca_config_map: String,
    pub rollout_complete: bool,
    /// Name of the operator-managed secret holding the concatenated material.
    pub operator_secret: String,
    pub owner: Option<OwnerReference>,
}

impl TlsDescriptor {
    pub fn volume_mount_plan(&self) -> volumes::VolumeMountPlan {
        volumes::plan(&self.ca_config_map, &self.operator_secret)
    }
}

/// Validates the user supplied material, upserts the operator secret and
/// returns the automation config modification for the resolved mode.
///
/// With TLS disabled the store is not touched at all.
pub async fn tls_config_modification<S: ObjectStore>(store: &S, tls: &TlsDescriptor) -> Result<Modification> {
    if !tls.enabled {
        return Ok(patch::tls_modification(
            crate::automation_config::TlsMode::Disabled,
            "",
        ));
    }

    material::read_ca_certificate(store, &tls.namespace, &tls.ca_config_map).await?;
    let (cert, key) = material::read_certificate_key(store, &tls.namespace, &tls.certificate_key_secret).await?;

    let file_name = material::synthesize(
        store,
        &tls.namespace,
        &tls.operator_secret,
        tls.owner.as_ref(),
        &cert,
        &key,
    )
    .await?;

    let mode = rollout::resolve(tls.enabled, tls.optional, tls.rollout_complete);
    debug!(
        "TLS for '{}/{}' resolved to {:?} (rollout complete: {})",
        tls.namespace, tls.name, mode, tls.rollout_complete
    );

    Ok(patch::tls_modification(mode, &file_name))
}
