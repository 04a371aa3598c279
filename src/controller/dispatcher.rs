//! Event-driven reconciliation from a watch over all `Memcached` resources.
//!
//! Each notification is routed by type: Added creates every child, Modified
//! reasserts every child, Deleted tears the children down. Anything else is
//! ignored. The watch resumes from the last seen resourceVersion when the
//! server closes it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::api::ClusterApi;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::reaper::reap_deployment;
use crate::controller::supervisor::{LoopTask, Shutdown, supervise};
use crate::crd::Memcached;
use crate::resources::DesiredChildren;
use crate::resources::common::{
    ServiceType, backend_service_name, cluster_name, cluster_namespace, router_deployment_name,
    tier_labels,
};

/// Resource version that starts a watch from the current state.
const FRESH_START: &str = "0";

/// A decoded watch notification.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Added(Memcached),
    Modified(Memcached),
    Deleted(Memcached),
    /// Any other notification type, e.g. bookmarks.
    Ignored {
        event_type: String,
        resource_version: Option<String>,
    },
}

impl ClusterEvent {
    /// Type tag, used for logs and metrics.
    pub fn event_type(&self) -> &str {
        match self {
            ClusterEvent::Added(_) => "ADDED",
            ClusterEvent::Modified(_) => "MODIFIED",
            ClusterEvent::Deleted(_) => "DELETED",
            ClusterEvent::Ignored { event_type, .. } => event_type,
        }
    }

    /// Resource version carried by the notification.
    pub fn resource_version(&self) -> Option<String> {
        match self {
            ClusterEvent::Added(obj) | ClusterEvent::Modified(obj) | ClusterEvent::Deleted(obj) => {
                obj.resource_version()
            }
            ClusterEvent::Ignored {
                resource_version, ..
            } => resource_version.clone(),
        }
    }
}

/// Long-running watch loop.
pub struct WatchDispatcher<A> {
    ctx: Arc<Context<A>>,
    resource_version: String,
}

impl<A: ClusterApi> WatchDispatcher<A> {
    pub fn new(ctx: Arc<Context<A>>) -> Self {
        Self {
            ctx,
            resource_version: FRESH_START.to_string(),
        }
    }

    /// Version the next watch resumes from.
    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }

    /// Watch until `shutdown` is triggered, pausing after failed iterations.
    pub async fn run(mut self, shutdown: Shutdown) {
        info!("Starting watch dispatcher");
        let ctx = self.ctx.clone();
        supervise("watch", &*ctx, &shutdown, &mut self).await;
        info!("Watch dispatcher stopped");
    }

    /// Open one watch and handle its notifications until the server closes it.
    pub async fn watch_once(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();
        let mut events = match ctx
            .api
            .watch_clusters(&self.resource_version, ctx.watch_timeout_secs())
            .await
        {
            Ok(events) => events,
            Err(e) if e.is_gone() => {
                self.restart_from_scratch(&e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if let Some(version) = event.resource_version() {
                        self.resource_version = version;
                    }
                    handle_event(&*ctx, event).await;
                }
                Err(e) if e.is_malformed() => {
                    warn!(error = %e, "Dropping malformed watch event");
                    record_event(&*ctx, "MALFORMED");
                }
                Err(e) if e.is_gone() => {
                    self.restart_from_scratch(&e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(resource_version = %self.resource_version, "Watch closed");
        Ok(())
    }

    /// The remembered version expired (410): the next watch starts fresh.
    fn restart_from_scratch(&mut self, error: &Error) {
        info!(error = %error, "Watch resource version expired, restarting from scratch");
        self.resource_version = FRESH_START.to_string();
    }
}

#[async_trait]
impl<A: ClusterApi> LoopTask for WatchDispatcher<A> {
    async fn run_once(&mut self) -> Result<()> {
        self.watch_once().await
    }
}

fn record_event<A>(ctx: &Context<A>, event_type: &str) {
    if let Some(ref state) = ctx.health_state {
        state.metrics.record_watch_event(event_type);
    }
}

/// Route one notification to its handler.
pub async fn handle_event<A: ClusterApi>(ctx: &Context<A>, event: ClusterEvent) {
    record_event(ctx, event.event_type());

    match event {
        ClusterEvent::Added(resource) => on_added(ctx, &resource).await,
        ClusterEvent::Modified(resource) => on_modified(ctx, &resource).await,
        ClusterEvent::Deleted(resource) => on_deleted(ctx, &resource).await,
        ClusterEvent::Ignored { event_type, .. } => {
            debug!(event_type = %event_type, "Ignoring watch event");
        }
    }
}

fn desired_children<A>(ctx: &Context<A>, resource: &Memcached) -> Option<DesiredChildren> {
    match DesiredChildren::for_cluster(resource, ctx.settings.router_configmap) {
        Ok(children) => Some(children),
        Err(e) => {
            warn!(
                namespace = %cluster_namespace(resource),
                name = %cluster_name(resource),
                error = %e,
                "Failed to build desired state"
            );
            None
        }
    }
}

/// Create every child, services first so names resolve when pods start.
pub async fn on_added<A: ClusterApi>(ctx: &Context<A>, resource: &Memcached) {
    info!(namespace = %cluster_namespace(resource), name = %cluster_name(resource), "Memcached added");
    let Some(children) = desired_children(ctx, resource) else {
        return;
    };

    for service in &children.services {
        ctx.create_child(service).await;
    }
    for deployment in &children.deployments {
        ctx.create_child(deployment).await;
    }
    if let Some(ref configmap) = children.configmap {
        ctx.create_child(configmap).await;
    }
}

/// Reassert every child without diffing.
pub async fn on_modified<A: ClusterApi>(ctx: &Context<A>, resource: &Memcached) {
    info!(namespace = %cluster_namespace(resource), name = %cluster_name(resource), "Memcached modified");
    let Some(children) = desired_children(ctx, resource) else {
        return;
    };

    for service in &children.services {
        ctx.update_child(service).await;
    }
    for deployment in &children.deployments {
        ctx.update_child(deployment).await;
    }
    if let Some(ref configmap) = children.configmap {
        ctx.update_child(configmap).await;
    }
}

/// Delete services, reap both deployments, then drop the ConfigMap.
pub async fn on_deleted<A: ClusterApi>(ctx: &Context<A>, resource: &Memcached) {
    let namespace = cluster_namespace(resource);
    let name = cluster_name(resource);
    info!(namespace = %namespace, name = %name, "Memcached deleted");

    ctx.delete_child::<Service>(&namespace, &name).await;
    ctx.delete_child::<Service>(&namespace, &backend_service_name(resource))
        .await;

    reap_deployment(
        ctx,
        &namespace,
        &name,
        &tier_labels(&name, ServiceType::Memcached),
    )
    .await;
    reap_deployment(
        ctx,
        &namespace,
        &router_deployment_name(resource),
        &tier_labels(&name, ServiceType::Mcrouter),
    )
    .await;

    // Attempted even when the feature is off so disabling it still cleans up
    ctx.delete_child::<ConfigMap>(&namespace, &name).await;
}
