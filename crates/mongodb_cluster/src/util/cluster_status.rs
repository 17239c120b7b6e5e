use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use serde_json::json;
use std::fmt;
use tracing::info;

use crate::api::v1::mongodbcluster::MongoDBCluster;
use crate::automation_config::TlsMode;
use crate::tls::TlsDescriptor;
use crate::util::errors::{Error, Result, StdError};
use crate::util::status::{now, set_status_condition};

pub const CLUSTER_READY_CONDITION: &str = "Ready";
pub const TLS_CONFIGURED_CONDITION: &str = "TLSConfigured";

// Phase represents the high-level status of a MongoDBCluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPhase {
    Pending,
    Creating,
    Running,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClusterPhase::Pending => write!(f, "Pending"),
            ClusterPhase::Creating => write!(f, "Creating"),
            ClusterPhase::Running => write!(f, "Running"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReason {
    MembersUpdating,
    MembersReady,
    TlsDisabled,
    TlsStaged,
    TlsEnabled,
    TlsConfigInvalid,
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatusReason::MembersUpdating => write!(f, "MembersUpdating"),
            StatusReason::MembersReady => write!(f, "MembersReady"),
            StatusReason::TlsDisabled => write!(f, "TLSDisabled"),
            StatusReason::TlsStaged => write!(f, "TLSStaged"),
            StatusReason::TlsEnabled => write!(f, "TLSEnabled"),
            StatusReason::TlsConfigInvalid => write!(f, "TLSConfigInvalid"),
        }
    }
}

/// Condition status, reason and message describing where the TLS rollout stands.
pub fn tls_condition(tls: &TlsDescriptor, mode: TlsMode) -> (bool, StatusReason, String) {
    match (tls.enabled, mode) {
        (false, _) => (false, StatusReason::TlsDisabled, "TLS is disabled".to_string()),
        (true, TlsMode::Disabled) => (
            false,
            StatusReason::TlsStaged,
            "TLS material is being mounted on all members".to_string(),
        ),
        (true, mode) => (true, StatusReason::TlsEnabled, format!("Members run TLS mode {mode:?}")),
    }
}

pub struct ClusterStatusManager<'a> {
    cluster: &'a MongoDBCluster,
    client: kube::Client,
}

impl<'a> ClusterStatusManager<'a> {
    pub fn new(client: &kube::Client, cluster: &'a MongoDBCluster) -> Self {
        Self {
            cluster,
            client: client.clone(),
        }
    }

    fn api(&self) -> Result<Api<MongoDBCluster>> {
        Ok(Api::namespaced(self.client.clone(), &self.cluster.namespace_or_err()?))
    }

    /// Merge-patches the given fields into the status subresource.
    async fn apply_status(&self, status: serde_json::Value) -> Result<()> {
        let name = self.cluster.name_any();
        let patch = Patch::Merge(json!({ "status": status }));

        self.api()?
            .patch_status(&name, &PatchParams::default(), &patch)
            .await
            .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
        Ok(())
    }

    async fn current_conditions(&self) -> Result<(Vec<Condition>, Option<i64>)> {
        let current = self
            .api()?
            .get(&self.cluster.name_any())
            .await
            .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
        let conditions = current
            .status
            .as_ref()
            .map_or_else(Vec::new, |s| s.conditions.clone());
        Ok((conditions, current.metadata.generation))
    }

    /// Updates the phase of the cluster
    pub async fn update_phase(&self, phase: ClusterPhase, message: Option<&str>) -> Result<()> {
        self.apply_status(json!({
            "phase": phase.to_string(),
            "message": message,
        }))
        .await?;
        info!("Updated cluster {} phase to {}", self.cluster.name_any(), phase);
        Ok(())
    }

    /// Records the member count and automation config version that are live.
    pub async fn record_members(&self, members: i32, version: i64) -> Result<()> {
        self.apply_status(json!({
            "currentMongodbMembers": members,
            "version": version,
        }))
        .await
    }

    pub async fn set_condition(
        &self,
        condition_type: &str,
        status: bool,
        reason: StatusReason,
        message: &str,
    ) -> Result<()> {
        let (current, generation) = self.current_conditions().await?;
        let new_condition = Condition {
            type_: condition_type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now()?,
            observed_generation: generation,
        };

        let (conditions, changed) = set_status_condition(&current, new_condition);
        if !changed {
            return Ok(());
        }

        self.apply_status(json!({ "conditions": conditions })).await?;
        info!(
            "Updated cluster {} condition {} to {} ({})",
            self.cluster.name_any(),
            condition_type,
            status,
            reason
        );
        Ok(())
    }
}
