use crate::api::v1::mongodbcluster::{MongoDBCluster, MONGODB_CLUSTER_FINALIZER, TLS_ROLLED_OUT_ANNOTATION};
use crate::config::OperatorConfig;
use crate::controllers::{automation_config, statefulset};
use crate::store::KubeStore;
use crate::tls::rollout::{self, MarkerTransition};
use crate::tls::tls_config_modification;
use crate::util::cluster_status::{
    tls_condition, ClusterPhase, ClusterStatusManager, StatusReason, CLUSTER_READY_CONDITION,
    TLS_CONFIGURED_CONDITION,
};
use crate::util::status::is_status_condition_true;
use crate::util::{errors, errors::ErrorWithRequeue, errors::Result, errors::StdError, metrics};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{Secret, Service},
};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        finalizer::{self, finalizer, Event as Finalizer},
        watcher::Config,
    },
    Resource,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

const INVALID_TLS_REQUEUE: Duration = Duration::from_secs(10);
const ROLLOUT_REQUEUE: Duration = Duration::from_secs(10);

impl MongoDBCluster {
    // Reconcile (for non-finalizer related changes)
    pub async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let client = ctx.client.clone();
        let status_manager = ClusterStatusManager::new(&client, self);

        if self.status.is_none() {
            status_manager.update_phase(ClusterPhase::Pending, None).await?;
            status_manager.update_phase(ClusterPhase::Creating, None).await?;
        }

        let tls = self.tls_descriptor()?;
        let store = KubeStore::new(client.clone());

        let modification = match tls_config_modification(&store, &tls).await {
            Ok(modification) => modification,
            Err(e) => {
                let invalid = invalid_tls_config(e)?;
                warn!("TLS configuration of '{}' is invalid: {}", self.name_any(), invalid.error);
                let message = invalid.error.to_string();
                status_manager
                    .set_condition(
                        TLS_CONFIGURED_CONDITION,
                        false,
                        StatusReason::TlsConfigInvalid,
                        &message,
                    )
                    .await?;
                status_manager
                    .update_phase(ClusterPhase::Pending, Some(&message))
                    .await?;
                return Err(errors::Error::ErrorWithRequeue(invalid));
            }
        };
        let mode = rollout::resolve(tls.enabled, tls.optional, tls.rollout_complete);

        let config = automation_config::reconcile(&store, self, modification).await?;
        let sts = statefulset::reconcile(&client, self, &ctx.config).await?;
        let rolled_out = statefulset::is_rolled_out(&sts, self.spec.members);

        match rollout::marker_transition(
            tls.enabled,
            tls.rollout_complete,
            rolled_out && statefulset::carries_tls_material(&sts),
        ) {
            MarkerTransition::Set => {
                self.set_rollout_marker(&ctx, true).await?;
                // the annotation change triggers the switch to the final TLS mode
                return Ok(Action::requeue(Duration::from_secs(1)));
            }
            MarkerTransition::Clear => self.set_rollout_marker(&ctx, false).await?,
            MarkerTransition::Keep => (),
        }

        let (tls_ready, reason, message) = tls_condition(&tls, mode);
        let was_ready = self
            .status
            .as_ref()
            .is_some_and(|s| is_status_condition_true(&s.conditions, TLS_CONFIGURED_CONDITION));
        if tls_ready && !was_ready {
            info!("All members of '{}' now run TLS mode {:?}", self.name_any(), mode);
        }
        status_manager
            .set_condition(TLS_CONFIGURED_CONDITION, tls_ready, reason, &message)
            .await?;
        ctx.metrics.set_tls_mode(self, mode);

        if !rolled_out {
            status_manager
                .set_condition(
                    CLUSTER_READY_CONDITION,
                    false,
                    StatusReason::MembersUpdating,
                    "Waiting for all members to run the latest template",
                )
                .await?;
            status_manager
                .update_phase(ClusterPhase::Creating, Some("members are being updated"))
                .await?;
            return Ok(Action::requeue(ROLLOUT_REQUEUE));
        }

        status_manager.record_members(self.spec.members, config.version).await?;
        status_manager
            .set_condition(
                CLUSTER_READY_CONDITION,
                true,
                StatusReason::MembersReady,
                "All members are ready",
            )
            .await?;
        status_manager.update_phase(ClusterPhase::Running, None).await?;

        // If no events were received, check back every 5 minutes
        Ok(Action::requeue(Duration::from_secs(5 * 60)))
    }

    async fn set_rollout_marker(&self, ctx: &Context, rolled_out: bool) -> Result<()> {
        let clusters: Api<MongoDBCluster> = Api::namespaced(ctx.client.clone(), &self.namespace_or_err()?);
        let value = if rolled_out { json!("true") } else { json!(null) };
        let patch = Patch::Merge(json!({
            "metadata": { "annotations": { TLS_ROLLED_OUT_ANNOTATION: value } }
        }));
        clusters
            .patch(&self.name_any(), &PatchParams::default(), &patch)
            .await
            .map_err(|e| errors::Error::StdError(StdError::KubeError(e)))?;

        let (reason, note) = if rolled_out {
            ("TLSRolledOut", "TLS material is mounted on every member")
        } else {
            ("TLSRolloutReset", "TLS is disabled")
        };
        info!("{} '{}': {}", reason, self.name_any(), note);
        ctx.diagnostics
            .read()
            .await
            .recorder(ctx.client.clone())
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note: Some(note.into()),
                    action: "Reconciling".into(),
                    secondary: None,
                },
                &self.object_ref(&()),
            )
            .await
            .map_err(|e| errors::Error::StdError(StdError::KubeError(e)))?;
        Ok(())
    }

    // Finalizer cleanup (the object was deleted, ensure nothing is orphaned)
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        ctx.metrics.forget_cluster(self);
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
        // Owned objects are garbage collected through their owner references
        recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: "DeleteRequested".into(),
                    note: Some(format!("Delete `{}`", self.name_any())),
                    action: "Deleting".into(),
                    secondary: None,
                },
                &self.object_ref(&()),
            )
            .await
            .map_err(|e| errors::Error::StdError(StdError::KubeError(e)))?;
        Ok(Action::await_change())
    }
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
    metrics: metrics::Metrics,
    config: OperatorConfig,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(config: OperatorConfig) -> Result<Self, prometheus::Error> {
        let registry = prometheus::Registry::default();
        let metrics = metrics::Metrics::default().register(&registry)?;
        Ok(Self {
            diagnostics: Arc::default(),
            registry,
            metrics,
            config,
        })
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
            config: self.config.clone(),
        })
    }
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
    pub config: OperatorConfig,
}

pub async fn reconcile(cluster: Arc<MongoDBCluster>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("mongodbcluster");
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = cluster.namespace_or_err()?;
    let clusters: Api<MongoDBCluster> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling MongoDBCluster \"{}\" in {}", cluster.name_any(), ns);
    let action = finalizer(&clusters, MONGODB_CLUSTER_FINALIZER, cluster, |event| async {
        match event {
            Finalizer::Apply(cluster) => cluster.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(cluster) => cluster.cleanup(ctx.clone()).await,
        }
    })
    .await;

    finalizer_outcome(action)
}

/// Missing TLS source material is retried after a short delay instead of
/// going through the error policy; every other error is handed back.
fn invalid_tls_config(error: errors::Error) -> Result<ErrorWithRequeue> {
    match error {
        errors::Error::StdError(e @ StdError::SourceMaterialMissing(_)) => {
            Ok(ErrorWithRequeue::new(e, INVALID_TLS_REQUEUE))
        }
        e => Err(e),
    }
}

fn finalizer_outcome(action: Result<Action, finalizer::Error<errors::Error>>) -> Result<Action> {
    match action {
        Ok(action) => Ok(action),
        Err(finalizer::Error::ApplyFailed(errors::Error::ErrorWithRequeue(e))) => {
            warn!("reconcile failed, requeueing in {:?}: {}", e.duration, e.error);
            Ok(Action::requeue(e.duration))
        }
        Err(e) => Err(errors::Error::StdError(StdError::FinalizerError(Box::new(e)))),
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "mongodb-cluster-controller".into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

fn error_policy(cluster: Arc<MongoDBCluster>, error: &errors::Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&cluster, error);
    Action::requeue(Duration::from_secs(5 * 60))
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State) -> Result<(), kube::Error> {
    let client = Client::try_default().await?;

    let clusters = Api::<MongoDBCluster>::all(client.clone());
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        return Err(e);
    }

    Controller::new(clusters, Config::default().any_semantic())
        .owns(Api::<StatefulSet>::all(client.clone()), Config::default())
        .owns(Api::<Service>::all(client.clone()), Config::default())
        .owns(Api::<Secret>::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
    Ok(())
}
