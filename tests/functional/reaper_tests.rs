//! Graceful Deployment teardown.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use memcached_operator::controller::backoff::RetryPolicy;
use memcached_operator::controller::context::Settings;
use memcached_operator::controller::reaper::{ReapFailure, ReapOutcome, reap_deployment};
use memcached_operator::resources::common::{ServiceType, tier_labels};
use memcached_operator::resources::deployments::generate_memcached_deployment;

use crate::fixtures::test_cluster;
use crate::{FakeCluster, context, context_with, meta};

fn selector() -> BTreeMap<String, String> {
    tier_labels("sessions", ServiceType::Memcached)
}

fn replica_set(name: &str, owner: Option<&str>) -> ReplicaSet {
    let mut metadata = meta("default", name, selector());
    metadata.owner_references = owner.map(|deployment| {
        vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: deployment.to_string(),
            uid: "deployment-uid".to_string(),
            ..Default::default()
        }]
    });
    ReplicaSet {
        metadata,
        ..Default::default()
    }
}

/// Cluster `sessions` with its memcached Deployment and one owned ReplicaSet.
fn seeded() -> FakeCluster {
    let fake = FakeCluster::new();
    fake.insert(&generate_memcached_deployment(&test_cluster(
        "sessions", "default",
    )));
    fake.insert(&replica_set("sessions-5d8f", Some("sessions")));
    fake
}

/// Polls report 1,1,1,1 then 0: deletes the ReplicaSet then the Deployment,
/// sleeping 0,2,4,6 seconds between the five polls.
#[tokio::test]
async fn test_reaper_waits_for_drain() {
    let fake = seeded();
    fake.script_drain("sessions-5d8f", &[1, 1, 1, 1, 0]);
    let (ctx, sleeper) = context(&fake);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert_eq!(outcome, ReapOutcome::Done);
    assert_eq!(sleeper.seconds(), vec![0, 2, 4, 6]);
    assert_eq!(fake.calls_of("get", "ReplicaSet").len(), 5);
    assert_eq!(
        fake.mutations(),
        vec![
            "patch Deployment default/sessions",
            "delete ReplicaSet default/sessions-5d8f",
            "delete Deployment default/sessions",
        ]
    );
    assert_eq!(fake.count("Deployment"), 0);
    assert_eq!(fake.count("ReplicaSet"), 0);
}

#[tokio::test]
async fn test_reaper_pauses_and_scales_down_first() {
    let fake = seeded();
    fake.script_drain("sessions-5d8f", &[2, 0]);
    fake.fail("delete", "ReplicaSet", "sessions-5d8f", 500);
    let (ctx, _) = context(&fake);

    reap_deployment(&ctx, "default", "sessions", &selector()).await;

    let deployment: Deployment = fake.stored("default", "sessions").unwrap();
    let spec = deployment.spec.unwrap();
    assert_eq!(spec.replicas, Some(0));
    assert_eq!(spec.revision_history_limit, Some(0));
    assert_eq!(spec.paused, Some(true));
}

/// Replicas never reach 0 across 5 polls: failure, nothing deleted, no wait
/// after the last poll.
#[tokio::test]
async fn test_reaper_gives_up_after_drain_attempts() {
    let fake = seeded();
    fake.script_drain("sessions-5d8f", &[1]);
    let (ctx, sleeper) = context(&fake);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert_eq!(
        outcome,
        ReapOutcome::Failed(ReapFailure::DrainTimeout {
            replica_set: "sessions-5d8f".to_string(),
            attempts: 5,
        })
    );
    assert_eq!(fake.calls_of("get", "ReplicaSet").len(), 5);
    assert_eq!(sleeper.seconds(), vec![0, 2, 4, 6]);
    assert!(fake.calls_of("delete", "ReplicaSet").is_empty());
    assert!(fake.calls_of("delete", "Deployment").is_empty());
}

/// Two candidate ReplicaSets: failure and zero delete calls.
#[tokio::test]
async fn test_reaper_refuses_ambiguous_ownership() {
    let fake = seeded();
    fake.insert(&replica_set("sessions-77aa", Some("sessions")));
    let (ctx, sleeper) = context(&fake);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert_eq!(
        outcome,
        ReapOutcome::Failed(ReapFailure::AmbiguousOwnership { found: 2 })
    );
    assert!(fake.calls_of("delete", "ReplicaSet").is_empty());
    assert!(fake.calls_of("delete", "Deployment").is_empty());
    assert!(sleeper.sleeps().is_empty());
}

#[tokio::test]
async fn test_reaper_refuses_when_no_replica_set_found() {
    let fake = FakeCluster::new();
    fake.insert(&generate_memcached_deployment(&test_cluster(
        "sessions", "default",
    )));
    // Same labels, but owned by another Deployment
    fake.insert(&replica_set("other-1111", Some("sessions-old")));
    let (ctx, _) = context(&fake);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert_eq!(
        outcome,
        ReapOutcome::Failed(ReapFailure::AmbiguousOwnership { found: 0 })
    );
    assert!(fake.calls_of("delete", "Deployment").is_empty());
}

#[tokio::test]
async fn test_reaper_accepts_unowned_replica_set() {
    let fake = FakeCluster::new();
    fake.insert(&generate_memcached_deployment(&test_cluster(
        "sessions", "default",
    )));
    fake.insert(&replica_set("sessions-5d8f", None));
    fake.script_drain("sessions-5d8f", &[0]);
    let (ctx, sleeper) = context(&fake);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert!(outcome.is_done());
    assert!(sleeper.sleeps().is_empty());
}

/// The Deployment is already gone: leftover ReplicaSet is still cleaned up.
#[tokio::test]
async fn test_reaper_cleans_up_after_deployment_gone() {
    let fake = FakeCluster::new();
    fake.insert(&replica_set("sessions-5d8f", Some("sessions")));
    fake.script_drain("sessions-5d8f", &[0]);
    let (ctx, _) = context(&fake);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert!(outcome.is_done());
    assert_eq!(fake.count("ReplicaSet"), 0);
    assert_eq!(
        fake.mutations(),
        vec![
            "patch Deployment default/sessions",
            "delete ReplicaSet default/sessions-5d8f",
            "delete Deployment default/sessions",
        ]
    );
}

#[tokio::test]
async fn test_reaper_nothing_left_is_done() {
    let fake = FakeCluster::new();
    let (ctx, _) = context(&fake);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert!(outcome.is_done());
    assert_eq!(fake.mutations(), vec!["patch Deployment default/sessions"]);
}

#[tokio::test]
async fn test_reaper_replica_set_gone_while_polling() {
    let fake = seeded();
    let (ctx, _) = context(&fake);
    fake.fail("get", "ReplicaSet", "sessions-5d8f", 404);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert!(outcome.is_done());
    assert_eq!(fake.calls_of("get", "ReplicaSet").len(), 1);
}

/// The Deployment is never deleted while its ReplicaSet may still exist.
#[tokio::test]
async fn test_reaper_keeps_deployment_when_replica_set_delete_fails() {
    let fake = seeded();
    fake.script_drain("sessions-5d8f", &[0]);
    fake.fail("delete", "ReplicaSet", "sessions-5d8f", 500);
    let (ctx, _) = context(&fake);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert_eq!(
        outcome,
        ReapOutcome::Failed(ReapFailure::DeleteReplicaSetFailed(
            "sessions-5d8f".to_string()
        ))
    );
    assert!(fake.calls_of("delete", "Deployment").is_empty());
    assert_eq!(fake.count("Deployment"), 1);
}

#[tokio::test]
async fn test_reaper_pause_failure_stops_teardown() {
    let fake = seeded();
    fake.fail("patch", "Deployment", "sessions", 500);
    let (ctx, _) = context(&fake);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert!(matches!(
        outcome,
        ReapOutcome::Failed(ReapFailure::PauseFailed(_))
    ));
    assert!(fake.calls_of("list", "ReplicaSet").is_empty());
    assert_eq!(fake.count("ReplicaSet"), 1);
}

#[tokio::test]
async fn test_reaper_uses_configured_policy() {
    let fake = seeded();
    fake.script_drain("sessions-5d8f", &[3]);
    let settings = Settings {
        drain_policy: RetryPolicy::new(3, Duration::from_secs(10)),
        ..Settings::default()
    };
    let (ctx, sleeper) = context_with(&fake, settings, None);

    let outcome = reap_deployment(&ctx, "default", "sessions", &selector()).await;

    assert!(!outcome.is_done());
    assert_eq!(fake.calls_of("get", "ReplicaSet").len(), 3);
    assert_eq!(sleeper.seconds(), vec![0, 10]);
}
