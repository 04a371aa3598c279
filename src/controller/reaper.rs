//! Graceful Deployment teardown.
//!
//! Deleting a Deployment outright lets the deployment controller race the
//! garbage collector and briefly recreate pods. The reaper instead walks
//! a small state machine:
//!
//! ```text
//! PauseAndScaleDown -> Discover -> WaitForDrain -> DeleteReplicaSet -> DeleteDeployment -> Done
//!         \               \             \                  \                  \
//!          +---------------+-------------+------------------+------------------+--> Failed
//! ```
//!
//! The Deployment is never deleted while its ReplicaSet may still exist, and
//! nothing is deleted when ReplicaSet ownership is ambiguous.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::controller::api::ObjectApi;
use crate::controller::context::Context;
use crate::resources::common::label_selector;

/// Why a teardown stopped before completing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReapFailure {
    #[error("failed to pause deployment: {0}")]
    PauseFailed(String),

    #[error("failed to list replica sets: {0}")]
    DiscoveryFailed(String),

    #[error("expected exactly one replica set, found {found}")]
    AmbiguousOwnership { found: usize },

    #[error("replica set {replica_set} still has pods after {attempts} polls")]
    DrainTimeout { replica_set: String, attempts: u32 },

    #[error("failed to delete replica set {0}")]
    DeleteReplicaSetFailed(String),

    #[error("failed to delete deployment")]
    DeleteDeploymentFailed,
}

impl ReapFailure {
    /// Metric label for this failure.
    pub fn as_label(&self) -> &'static str {
        match self {
            ReapFailure::PauseFailed(_) => "pause_failed",
            ReapFailure::DiscoveryFailed(_) => "discovery_failed",
            ReapFailure::AmbiguousOwnership { .. } => "ambiguous_ownership",
            ReapFailure::DrainTimeout { .. } => "drain_timeout",
            ReapFailure::DeleteReplicaSetFailed(_) => "delete_replica_set_failed",
            ReapFailure::DeleteDeploymentFailed => "delete_deployment_failed",
        }
    }
}

/// States of one teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapState {
    PauseAndScaleDown,
    /// Find the single ReplicaSet; `deployment_gone` when the pause hit a 404.
    Discover { deployment_gone: bool },
    WaitForDrain { replica_set: String },
    DeleteReplicaSet { replica_set: String },
    DeleteDeployment,
    Done,
    Failed(ReapFailure),
}

impl fmt::Display for ReapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReapState::PauseAndScaleDown => write!(f, "PauseAndScaleDown"),
            ReapState::Discover { .. } => write!(f, "Discover"),
            ReapState::WaitForDrain { .. } => write!(f, "WaitForDrain"),
            ReapState::DeleteReplicaSet { .. } => write!(f, "DeleteReplicaSet"),
            ReapState::DeleteDeployment => write!(f, "DeleteDeployment"),
            ReapState::Done => write!(f, "Done"),
            ReapState::Failed(_) => write!(f, "Failed"),
        }
    }
}

/// Terminal result of a teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapOutcome {
    Done,
    Failed(ReapFailure),
}

impl ReapOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, ReapOutcome::Done)
    }

    fn as_label(&self) -> &'static str {
        match self {
            ReapOutcome::Done => "done",
            ReapOutcome::Failed(failure) => failure.as_label(),
        }
    }
}

/// Tears down one Deployment and its ReplicaSet.
pub struct DeploymentReaper<'a, A> {
    ctx: &'a Context<A>,
    namespace: &'a str,
    name: &'a str,
    /// Pod selector of the Deployment, used to discover its ReplicaSet.
    selector: &'a BTreeMap<String, String>,
}

/// Tear down `namespace/name` whose pods match `selector`.
pub async fn reap_deployment<A>(
    ctx: &Context<A>,
    namespace: &str,
    name: &str,
    selector: &BTreeMap<String, String>,
) -> ReapOutcome
where
    A: ObjectApi<Deployment> + ObjectApi<ReplicaSet>,
{
    DeploymentReaper::new(ctx, namespace, name, selector)
        .run()
        .await
}

impl<'a, A> DeploymentReaper<'a, A>
where
    A: ObjectApi<Deployment> + ObjectApi<ReplicaSet>,
{
    pub fn new(
        ctx: &'a Context<A>,
        namespace: &'a str,
        name: &'a str,
        selector: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            ctx,
            namespace,
            name,
            selector,
        }
    }

    /// Drive the state machine to a terminal state.
    pub async fn run(&self) -> ReapOutcome {
        info!(namespace = %self.namespace, name = %self.name, "Reaping deployment");

        let mut state = ReapState::PauseAndScaleDown;
        let outcome = loop {
            state = match state {
                ReapState::Done => break ReapOutcome::Done,
                ReapState::Failed(failure) => break ReapOutcome::Failed(failure),
                current => {
                    let next = self.step(&current).await;
                    debug!(
                        namespace = %self.namespace,
                        name = %self.name,
                        from = %current,
                        to = %next,
                        "Reaper transition"
                    );
                    next
                }
            };
        };

        match &outcome {
            ReapOutcome::Done => {
                info!(namespace = %self.namespace, name = %self.name, "Deployment reaped")
            }
            ReapOutcome::Failed(failure) => {
                warn!(namespace = %self.namespace, name = %self.name, reason = %failure, "Deployment reap failed")
            }
        }
        if let Some(ref state) = self.ctx.health_state {
            state.metrics.record_reaper_run(outcome.as_label());
        }
        outcome
    }

    async fn step(&self, state: &ReapState) -> ReapState {
        match state {
            ReapState::PauseAndScaleDown => self.pause_and_scale_down().await,
            ReapState::Discover { deployment_gone } => self.discover(*deployment_gone).await,
            ReapState::WaitForDrain { replica_set } => self.wait_for_drain(replica_set).await,
            ReapState::DeleteReplicaSet { replica_set } => {
                if self
                    .ctx
                    .delete_child::<ReplicaSet>(self.namespace, replica_set)
                    .await
                {
                    ReapState::DeleteDeployment
                } else {
                    ReapState::Failed(ReapFailure::DeleteReplicaSetFailed(replica_set.clone()))
                }
            }
            ReapState::DeleteDeployment => {
                if self
                    .ctx
                    .delete_child::<Deployment>(self.namespace, self.name)
                    .await
                {
                    ReapState::Done
                } else {
                    ReapState::Failed(ReapFailure::DeleteDeploymentFailed)
                }
            }
            ReapState::Done => ReapState::Done,
            ReapState::Failed(failure) => ReapState::Failed(failure.clone()),
        }
    }

    async fn pause_and_scale_down(&self) -> ReapState {
        let patch = serde_json::json!({
            "spec": {
                "replicas": 0,
                "revisionHistoryLimit": 0,
                "paused": true
            }
        });

        match <A as ObjectApi<Deployment>>::patch(&self.ctx.api, self.namespace, self.name, &patch)
            .await
        {
            Ok(_) => ReapState::Discover {
                deployment_gone: false,
            },
            Err(e) if e.is_not_found() => {
                debug!(namespace = %self.namespace, name = %self.name, "Deployment already gone");
                ReapState::Discover {
                    deployment_gone: true,
                }
            }
            Err(e) => ReapState::Failed(ReapFailure::PauseFailed(e.to_string())),
        }
    }

    async fn discover(&self, deployment_gone: bool) -> ReapState {
        let selector = label_selector(self.selector);
        let replica_sets = match <A as ObjectApi<ReplicaSet>>::list(
            &self.ctx.api,
            Some(self.namespace),
            &selector,
        )
        .await
        {
            Ok(items) => items,
            Err(e) => return ReapState::Failed(ReapFailure::DiscoveryFailed(e.to_string())),
        };

        let owned: Vec<ReplicaSet> = replica_sets
            .into_iter()
            .filter(|rs| owned_by(rs, self.name))
            .collect();

        match owned.as_slice() {
            [rs] => ReapState::WaitForDrain {
                replica_set: rs.name_any(),
            },
            [] if deployment_gone => ReapState::Done,
            _ => {
                warn!(
                    namespace = %self.namespace,
                    name = %self.name,
                    selector = %selector,
                    found = owned.len(),
                    "Expected exactly one replica set, refusing to delete"
                );
                ReapState::Failed(ReapFailure::AmbiguousOwnership { found: owned.len() })
            }
        }
    }

    async fn wait_for_drain(&self, replica_set: &str) -> ReapState {
        let policy = self.ctx.settings.drain_policy;

        for attempt in 0..policy.max_attempts {
            if self.drained(replica_set).await {
                return ReapState::DeleteReplicaSet {
                    replica_set: replica_set.to_string(),
                };
            }
            // No wait after the last poll
            if attempt + 1 < policy.max_attempts {
                self.ctx.sleep(policy.delay_after(attempt)).await;
            }
        }

        ReapState::Failed(ReapFailure::DrainTimeout {
            replica_set: replica_set.to_string(),
            attempts: policy.max_attempts,
        })
    }

    /// One poll: no running replicas, or the ReplicaSet is gone.
    async fn drained(&self, replica_set: &str) -> bool {
        match <A as ObjectApi<ReplicaSet>>::get(&self.ctx.api, self.namespace, replica_set).await {
            Ok(rs) => {
                let replicas = rs.status.as_ref().map(|s| s.replicas);
                debug!(namespace = %self.namespace, replica_set = %replica_set, replicas = ?replicas, "Polled replica set");
                replicas == Some(0)
            }
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!(namespace = %self.namespace, replica_set = %replica_set, error = %e, "Failed to read replica set");
                false
            }
        }
    }
}

/// A ReplicaSet belongs to the Deployment when it has no owner or names it as owner.
fn owned_by(rs: &ReplicaSet, deployment: &str) -> bool {
    match rs.metadata.owner_references.as_deref() {
        None | Some([]) => true,
        Some(owners) => owners
            .iter()
            .any(|o| o.kind == "Deployment" && o.name == deployment),
    }
}
