//! memcached-operator library crate
//!
//! This module exports the controller, CRD definitions, and resource generators.

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use controller::api::{ClusterApi, KubeApi, MemcachedApi, ObjectApi, scoped_api};
pub use controller::context::{Context, Settings};
pub use controller::supervisor::Shutdown;
pub use health::HealthState;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use controller::dispatcher::WatchDispatcher;
use controller::resync::PeriodicReconciler;

/// Handles of the two running loops.
pub struct OperatorHandles {
    pub watch: JoinHandle<()>,
    pub resync: JoinHandle<()>,
}

/// Spawn the watch dispatcher and the periodic reconciler.
///
/// Both share `ctx` and stop once `shutdown` is triggered. Marks the operator
/// ready when health state is present.
pub async fn run_operator<A>(ctx: Arc<Context<A>>, shutdown: Shutdown) -> OperatorHandles
where
    A: ClusterApi + 'static,
{
    info!(
        router_configmap = ctx.settings.router_configmap,
        "Starting controller loops (scope: cluster-wide)"
    );

    let watch = tokio::spawn(WatchDispatcher::new(ctx.clone()).run(shutdown.clone()));
    let resync = tokio::spawn(PeriodicReconciler::new(ctx.clone()).run(shutdown));

    if let Some(ref state) = ctx.health_state {
        state.set_ready(true).await;
    }

    OperatorHandles { watch, resync }
}
