//! Periodic resync.
//!
//! Independent of the watch, every tick:
//! 1. **check_existing**: creates missing children of every `Memcached` and
//!    reasserts those whose resourceVersion changed since the last write.
//! 2. **collect_garbage**: deletes labelled children whose owning
//!    `Memcached` no longer exists. Deployments go through the reaper.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::controller::actions::child_identity;
use crate::controller::api::{ClusterApi, MemcachedApi, ObjectApi};
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::reaper::reap_deployment;
use crate::controller::supervisor::{LoopTask, Shutdown, supervise};
use crate::controller::version_cache::VersionCache;
use crate::resources::DesiredChildren;
use crate::resources::common::{CLUSTER_LABEL, cluster_name, cluster_namespace, default_label_selector};

/// What happened to one child during check_existing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildSync {
    Created,
    Updated,
    /// Unchanged since the last write.
    Skipped,
    Failed,
}

/// Summary of one tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// The cluster list failed and the tick did nothing.
    pub aborted: bool,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Orphans successfully removed.
    pub collected: usize,
}

impl ResyncReport {
    fn count(&mut self, sync: ChildSync) {
        match sync {
            ChildSync::Created => self.created += 1,
            ChildSync::Updated => self.updated += 1,
            ChildSync::Skipped => self.skipped += 1,
            ChildSync::Failed => self.failed += 1,
        }
    }
}

/// Fixed-interval resync loop. Owns the version cache.
pub struct PeriodicReconciler<A> {
    ctx: Arc<Context<A>>,
    cache: VersionCache,
}

impl<A: ClusterApi> PeriodicReconciler<A> {
    pub fn new(ctx: Arc<Context<A>>) -> Self {
        Self {
            ctx,
            cache: VersionCache::new(),
        }
    }

    pub fn cache(&self) -> &VersionCache {
        &self.cache
    }

    /// Tick until `shutdown` is triggered.
    pub async fn run(mut self, shutdown: Shutdown) {
        info!(
            interval_secs = self.ctx.settings.resync_interval.as_secs(),
            "Starting periodic reconciler"
        );
        let ctx = self.ctx.clone();
        supervise("resync", &*ctx, &shutdown, &mut self).await;
        info!("Periodic reconciler stopped");
    }

    /// One full pass: check_existing, then collect_garbage.
    pub async fn tick(&mut self) -> ResyncReport {
        let start = Instant::now();
        let mut report = ResyncReport::default();

        if let Err(e) = self.check_existing(&mut report).await {
            error!(error = %e, "Failed to list Memcached resources, skipping resync");
            report.aborted = true;
            return report;
        }
        report.collected = self.collect_garbage().await;

        let duration = start.elapsed().as_secs_f64();
        if let Some(ref state) = self.ctx.health_state {
            state.metrics.record_resync(duration);
        }
        debug!(?report, duration_secs = duration, "Resync complete");
        report
    }

    async fn check_existing(&mut self, report: &mut ResyncReport) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let ctx = &*ctx;
        let clusters = ctx.api.list_clusters().await?;

        for resource in &clusters {
            let children =
                match DesiredChildren::for_cluster(resource, ctx.settings.router_configmap) {
                    Ok(children) => children,
                    Err(e) => {
                        warn!(
                            namespace = %cluster_namespace(resource),
                            name = %cluster_name(resource),
                            error = %e,
                            "Failed to build desired state"
                        );
                        continue;
                    }
                };

            for service in &children.services {
                report.count(ensure_child(ctx, &mut self.cache, service).await);
            }
            for deployment in &children.deployments {
                report.count(ensure_child(ctx, &mut self.cache, deployment).await);
            }
            if let Some(ref configmap) = children.configmap {
                report.count(ensure_child(ctx, &mut self.cache, configmap).await);
            }
        }
        Ok(())
    }

    /// Remove orphaned children; returns how many were removed.
    pub async fn collect_garbage(&self) -> usize {
        let ctx = &*self.ctx;
        let mut collected = 0;

        for service in find_orphans::<A, Service>(ctx).await {
            let namespace = service.namespace().unwrap_or_default();
            if ctx
                .delete_child::<Service>(&namespace, &service.name_any())
                .await
            {
                record_collected(ctx, "Service");
                collected += 1;
            }
        }

        for deployment in find_orphans::<A, Deployment>(ctx).await {
            let namespace = deployment.namespace().unwrap_or_default();
            let selector = pod_selector(&deployment);
            if reap_deployment(ctx, &namespace, &deployment.name_any(), &selector)
                .await
                .is_done()
            {
                record_collected(ctx, "Deployment");
                collected += 1;
            }
        }

        for configmap in find_orphans::<A, ConfigMap>(ctx).await {
            let namespace = configmap.namespace().unwrap_or_default();
            if ctx
                .delete_child::<ConfigMap>(&namespace, &configmap.name_any())
                .await
            {
                record_collected(ctx, "ConfigMap");
                collected += 1;
            }
        }

        collected
    }
}

#[async_trait]
impl<A: ClusterApi> LoopTask for PeriodicReconciler<A> {
    async fn run_once(&mut self) -> Result<()> {
        self.tick().await;
        self.ctx.sleep(self.ctx.settings.resync_interval).await;
        Ok(())
    }
}

/// Make one child exist and match its desired state.
pub async fn ensure_child<A, K>(ctx: &Context<A>, cache: &mut VersionCache, desired: &K) -> ChildSync
where
    A: ObjectApi<K>,
    K: Resource<DynamicType = ()> + Serialize + std::fmt::Debug + Send + Sync,
{
    let kind = K::kind(&());
    let (namespace, name) = child_identity(desired);

    match <A as ObjectApi<K>>::get(&ctx.api, &namespace, &name).await {
        Ok(existing) if cache.is_current(existing.meta()) => {
            debug!(kind = %kind, namespace = %namespace, name = %name, "Unchanged since last write");
            ChildSync::Skipped
        }
        Ok(_) => match ctx.update_child(desired).await {
            Some(updated) => {
                cache.record(updated.meta());
                ChildSync::Updated
            }
            None => ChildSync::Failed,
        },
        Err(e) if e.is_not_found() => match ctx.create_child(desired).await {
            Some(created) => {
                cache.record(created.meta());
                ChildSync::Created
            }
            None => ChildSync::Failed,
        },
        Err(e) => {
            error!(kind = %kind, namespace = %namespace, name = %name, error = %e, "Failed to read");
            ChildSync::Failed
        }
    }
}

/// Labelled objects of kind `K` whose `Memcached` is confirmed gone.
pub async fn find_orphans<A, K>(ctx: &Context<A>) -> Vec<K>
where
    A: MemcachedApi + ObjectApi<K>,
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    let objects = match <A as ObjectApi<K>>::list(&ctx.api, None, &default_label_selector()).await {
        Ok(objects) => objects,
        Err(e) => {
            error!(kind = %kind, error = %e, "Failed to list managed objects");
            return Vec::new();
        }
    };

    let mut orphans = Vec::new();
    for object in objects {
        let namespace = object.meta().namespace.clone().unwrap_or_default();
        let name = object.meta().name.clone().unwrap_or_default();
        let Some(cluster) = object
            .meta()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CLUSTER_LABEL))
            .cloned()
        else {
            warn!(kind = %kind, namespace = %namespace, name = %name, "Managed object has no cluster label, skipping");
            continue;
        };

        match ctx.api.get_cluster(&namespace, &cluster).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!(kind = %kind, namespace = %namespace, name = %name, cluster = %cluster, "Found orphan");
                orphans.push(object);
            }
            Err(e) => {
                error!(kind = %kind, namespace = %namespace, name = %name, error = %e, "Failed to read owning Memcached, leaving object");
            }
        }
    }
    orphans
}

/// Pod selector of a Deployment, falling back to its own labels.
fn pod_selector(deployment: &Deployment) -> BTreeMap<String, String> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.match_labels.clone())
        .filter(|labels| !labels.is_empty())
        .unwrap_or_else(|| deployment.labels().clone())
}

fn record_collected<A>(ctx: &Context<A>, kind: &str) {
    if let Some(ref state) = ctx.health_state {
        state.metrics.record_garbage_collected(kind);
    }
}
