//! Periodic resync: convergence, version cache skips and garbage collection.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use memcached_operator::controller::context::Settings;
use memcached_operator::controller::resync::{
    ChildSync, PeriodicReconciler, ResyncReport, ensure_child,
};
use memcached_operator::controller::version_cache::VersionCache;
use memcached_operator::health::HealthState;
use memcached_operator::resources::common::{ServiceType, default_labels, tier_labels};
use memcached_operator::resources::deployments::generate_memcached_deployment;
use memcached_operator::resources::services::generate_router_service;
use memcached_operator::Shutdown;

use crate::fixtures::test_cluster;
use crate::{FakeCluster, context, context_with, meta};

fn labelled_service(namespace: &str, name: &str, cluster: Option<&str>) -> Service {
    Service {
        metadata: meta(namespace, name, default_labels(cluster)),
        ..Default::default()
    }
}

/// One tick creates exactly 2 Services and 2 Deployments; the next tick
/// issues zero updates.
#[tokio::test]
async fn test_tick_converges_then_skips() {
    let fake = FakeCluster::new();
    fake.add_cluster(test_cluster("sessions", "default"));
    let (ctx, _) = context(&fake);
    let mut reconciler = PeriodicReconciler::new(ctx);

    let first = reconciler.tick().await;
    assert_eq!(
        first,
        ResyncReport {
            created: 4,
            ..Default::default()
        }
    );
    assert_eq!(fake.count("Service"), 2);
    assert_eq!(fake.count("Deployment"), 2);
    assert_eq!(fake.count("ConfigMap"), 0);
    assert_eq!(reconciler.cache().len(), 4);

    fake.clear_calls();
    let second = reconciler.tick().await;
    assert_eq!(second.skipped, 4);
    assert!(fake.calls_of("patch", "Service").is_empty());
    assert!(fake.calls_of("patch", "Deployment").is_empty());
    assert!(fake.mutations().is_empty());
}

#[tokio::test]
async fn test_tick_creates_configmap_when_enabled() {
    let fake = FakeCluster::new();
    fake.add_cluster(test_cluster("sessions", "default"));
    let settings = Settings {
        router_configmap: true,
        ..Settings::default()
    };
    let (ctx, _) = context_with(&fake, settings, None);
    let mut reconciler = PeriodicReconciler::new(ctx);

    let report = reconciler.tick().await;

    assert_eq!(report.created, 5);
    assert!(fake.stored::<ConfigMap>("default", "sessions").is_some());
}

#[tokio::test]
async fn test_tick_updates_only_changed_children() {
    let fake = FakeCluster::new();
    fake.add_cluster(test_cluster("sessions", "default"));
    let (ctx, _) = context(&fake);
    let mut reconciler = PeriodicReconciler::new(ctx);
    reconciler.tick().await;

    fake.touch("Deployment", "default", "sessions-router");
    fake.clear_calls();
    let report = reconciler.tick().await;

    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 3);
    assert_eq!(fake.mutations(), vec!["patch Deployment default/sessions-router"]);

    // The update refreshed the cache
    fake.clear_calls();
    assert_eq!(reconciler.tick().await.skipped, 4);
}

/// Children that exist but were never written by this process are reasserted once.
#[tokio::test]
async fn test_tick_reasserts_unknown_children() {
    let fake = FakeCluster::new();
    let cluster = test_cluster("sessions", "default");
    fake.add_cluster(cluster.clone());
    fake.insert(&generate_router_service(&cluster));
    let (ctx, _) = context(&fake);
    let mut reconciler = PeriodicReconciler::new(ctx);

    let report = reconciler.tick().await;

    assert_eq!(report.created, 3);
    assert_eq!(report.updated, 1);
}

/// A desired object without a namespace is read and written in `default`.
#[tokio::test]
async fn test_ensure_child_defaults_namespace_consistently() {
    let fake = FakeCluster::new();
    let (ctx, _) = context(&fake);
    let mut cache = VersionCache::new();
    let mut service = generate_router_service(&test_cluster("sessions", "default"));
    service.metadata.namespace = None;

    assert_eq!(ensure_child(&ctx, &mut cache, &service).await, ChildSync::Created);
    assert_eq!(ensure_child(&ctx, &mut cache, &service).await, ChildSync::Skipped);

    assert!(fake.stored::<Service>("default", "sessions").is_some());
    assert!(
        fake.calls_of("get", "Service")
            .iter()
            .all(|c| c.namespace == "default")
    );
    assert_eq!(fake.calls_of("create", "Service").len(), 1);
}

/// One child's failure never aborts the others.
#[tokio::test]
async fn test_child_failure_does_not_abort_tick() {
    let fake = FakeCluster::new();
    fake.add_cluster(test_cluster("sessions", "default"));
    fake.fail("create", "Service", "sessions", 500);
    fake.fail("get", "Deployment", "sessions", 503);
    let (ctx, _) = context(&fake);
    let mut reconciler = PeriodicReconciler::new(ctx);

    let report = reconciler.tick().await;

    assert_eq!(report.failed, 2);
    assert_eq!(report.created, 2);
    assert!(fake.stored::<Service>("default", "sessions-backend").is_some());
    assert!(
        fake.stored::<k8s_openapi::api::apps::v1::Deployment>("default", "sessions-router")
            .is_some()
    );
}

/// A failed cluster list aborts the tick, garbage collection included.
#[tokio::test]
async fn test_list_failure_aborts_tick() {
    let fake = FakeCluster::new();
    fake.fail_list_clusters();
    fake.insert(&labelled_service("default", "ghost", Some("ghost")));
    let (ctx, _) = context(&fake);
    let mut reconciler = PeriodicReconciler::new(ctx);

    let report = reconciler.tick().await;

    assert!(report.aborted);
    assert!(fake.calls_of("list", "Service").is_empty());
    assert_eq!(fake.count("Service"), 1);
}

/// An orphan Service is deleted exactly once; an owned one is never touched.
#[tokio::test]
async fn test_garbage_collects_orphan_service_once() {
    let fake = FakeCluster::new();
    fake.add_cluster(test_cluster("sessions", "default"));
    fake.insert(&labelled_service("default", "ghost", Some("ghost")));
    let (ctx, _) = context(&fake);
    let mut reconciler = PeriodicReconciler::new(ctx);

    let first = reconciler.tick().await;
    reconciler.tick().await;

    assert_eq!(first.collected, 1);
    let ghost_deletes: Vec<_> = fake
        .calls_of("delete", "Service")
        .into_iter()
        .filter(|c| c.name == "ghost")
        .collect();
    assert_eq!(ghost_deletes.len(), 1);
    assert!(
        fake.calls_of("delete", "Service")
            .iter()
            .all(|c| c.name == "ghost")
    );
    assert!(fake.stored::<Service>("default", "sessions").is_some());
}

#[tokio::test]
async fn test_garbage_collection_is_namespace_aware() {
    let fake = FakeCluster::new();
    fake.add_cluster(test_cluster("sessions", "team-a"));
    // Same cluster name, different namespace: orphaned
    fake.insert(&labelled_service("team-b", "sessions", Some("sessions")));
    let (ctx, _) = context(&fake);
    let reconciler = PeriodicReconciler::new(ctx);

    assert_eq!(reconciler.collect_garbage().await, 1);
    assert!(fake.stored::<Service>("team-b", "sessions").is_none());
}

/// Ambiguous owner lookups never delete.
#[tokio::test]
async fn test_garbage_collection_fails_safe() {
    let fake = FakeCluster::new();
    fake.insert(&labelled_service("default", "flaky", Some("flaky")));
    fake.fail("get_cluster", "Memcached", "flaky", 500);
    let (ctx, _) = context(&fake);
    let reconciler = PeriodicReconciler::new(ctx);

    assert_eq!(reconciler.collect_garbage().await, 0);
    assert!(fake.calls_of("delete", "Service").is_empty());
}

#[tokio::test]
async fn test_garbage_collection_skips_objects_without_cluster_label() {
    let fake = FakeCluster::new();
    fake.insert(&labelled_service("default", "unlabelled", None));
    let (ctx, _) = context(&fake);
    let reconciler = PeriodicReconciler::new(ctx);

    assert_eq!(reconciler.collect_garbage().await, 0);
    assert_eq!(fake.count("Service"), 1);
    assert!(fake.calls_of("get", "Memcached").is_empty());
}

#[tokio::test]
async fn test_garbage_collection_ignores_foreign_objects() {
    let fake = FakeCluster::new();
    fake.insert(&Service {
        metadata: meta("default", "unrelated", Default::default()),
        ..Default::default()
    });
    let (ctx, _) = context(&fake);
    let reconciler = PeriodicReconciler::new(ctx);

    reconciler.collect_garbage().await;

    assert_eq!(fake.count("Service"), 1);
}

/// Orphaned Deployments go through the reaper.
#[tokio::test]
async fn test_garbage_collection_reaps_orphan_deployment() {
    let fake = FakeCluster::new();
    fake.insert(&generate_memcached_deployment(&test_cluster("ghost", "default")));
    let mut rs_meta = meta(
        "default",
        "ghost-1234",
        tier_labels("ghost", ServiceType::Memcached),
    );
    rs_meta.owner_references = Some(vec![
        k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
            kind: "Deployment".to_string(),
            name: "ghost".to_string(),
            ..Default::default()
        },
    ]);
    fake.insert(&ReplicaSet {
        metadata: rs_meta,
        ..Default::default()
    });
    fake.script_drain("ghost-1234", &[1, 0]);
    let (ctx, sleeper) = context(&fake);
    let reconciler = PeriodicReconciler::new(ctx);

    assert_eq!(reconciler.collect_garbage().await, 1);
    assert_eq!(
        fake.mutations(),
        vec![
            "patch Deployment default/ghost",
            "delete ReplicaSet default/ghost-1234",
            "delete Deployment default/ghost",
        ]
    );
    assert_eq!(sleeper.seconds(), vec![0]);
}

#[tokio::test]
async fn test_garbage_collection_removes_orphan_configmap() {
    let fake = FakeCluster::new();
    fake.insert(&ConfigMap {
        metadata: meta("default", "ghost", default_labels(Some("ghost"))),
        ..Default::default()
    });
    let health = Arc::new(HealthState::new());
    let (ctx, _) = context_with(&fake, Settings::default(), Some(health.clone()));
    let reconciler = PeriodicReconciler::new(ctx);

    assert_eq!(reconciler.collect_garbage().await, 1);
    assert_eq!(fake.count("ConfigMap"), 0);
    assert!(
        health
            .metrics
            .encode()
            .contains(r#"memcached_operator_garbage_collected_total{kind="ConfigMap"} 1"#)
    );
}

/// The loop ticks, waits the resync interval and stops on shutdown.
#[tokio::test]
async fn test_run_ticks_until_shutdown() {
    let fake = FakeCluster::new();
    fake.add_cluster(test_cluster("sessions", "default"));
    let (ctx, sleeper) = context(&fake);
    let shutdown = Shutdown::new();
    sleeper.stop_after(2, shutdown.clone());

    PeriodicReconciler::new(ctx).run(shutdown).await;

    assert_eq!(
        sleeper.sleeps(),
        vec![Duration::from_secs(60), Duration::from_secs(60)]
    );
    assert_eq!(fake.calls_of("list", "Memcached").len(), 2);
    assert_eq!(fake.count("Service"), 2);
}
