//! Idempotent create/update/delete of child objects.
//!
//! These never fail the caller: expected outcomes (conflict on create,
//! not found on delete) are logged at debug, anything else at error, and the
//! caller gets a sentinel (`None` / `false`) meaning "retry later".

use std::fmt::Debug;

use kube::Resource;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::controller::api::ObjectApi;
use crate::controller::context::Context;
use crate::controller::error::Error;

/// Outcome label recorded for each child operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Already exists (create) or already gone (delete).
    Unchanged,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Unchanged => "unchanged",
            Outcome::Failure => "failure",
        }
    }
}

/// Namespace and name of a desired child; a missing namespace means `default`.
pub fn child_identity<K: Resource>(object: &K) -> (String, String) {
    let meta = object.meta();
    (
        meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
        meta.name.clone().unwrap_or_default(),
    )
}

impl<A> Context<A> {
    fn record_child_operation(&self, kind: &str, operation: &str, outcome: Outcome) {
        if let Some(ref state) = self.health_state {
            state
                .metrics
                .record_child_operation(kind, operation, outcome.as_str());
        }
    }

    /// Create `desired`; returns the stored object, or `None` on conflict or error.
    pub async fn create_child<K>(&self, desired: &K) -> Option<K>
    where
        A: ObjectApi<K>,
        K: Resource<DynamicType = ()> + Debug + Send + Sync,
    {
        let kind = K::kind(&());
        let (namespace, name) = child_identity(desired);

        match self.api.create(&namespace, desired).await {
            Ok(created) => {
                info!(kind = %kind, namespace = %namespace, name = %name, "Created");
                self.record_child_operation(&kind, "create", Outcome::Success);
                Some(created)
            }
            Err(e) if e.is_conflict() => {
                debug!(kind = %kind, namespace = %namespace, name = %name, "Already exists");
                self.record_child_operation(&kind, "create", Outcome::Unchanged);
                None
            }
            Err(e) => {
                error!(kind = %kind, namespace = %namespace, name = %name, error = %e, "Failed to create");
                self.record_child_operation(&kind, "create", Outcome::Failure);
                None
            }
        }
    }

    /// Reassert `desired` over the live object; returns the patched object or `None`.
    pub async fn update_child<K>(&self, desired: &K) -> Option<K>
    where
        A: ObjectApi<K>,
        K: Resource<DynamicType = ()> + Serialize + Debug + Send + Sync,
    {
        let kind = K::kind(&());
        let (namespace, name) = child_identity(desired);

        let result = match serde_json::to_value(desired) {
            Ok(patch) => self.api.patch(&namespace, &name, &patch).await,
            Err(e) => Err(Error::from(e)),
        };

        match result {
            Ok(updated) => {
                info!(kind = %kind, namespace = %namespace, name = %name, "Updated");
                self.record_child_operation(&kind, "update", Outcome::Success);
                Some(updated)
            }
            Err(e) => {
                error!(kind = %kind, namespace = %namespace, name = %name, error = %e, "Failed to update");
                self.record_child_operation(&kind, "update", Outcome::Failure);
                None
            }
        }
    }

    /// Delete `namespace/name`; an already missing object counts as success.
    pub async fn delete_child<K>(&self, namespace: &str, name: &str) -> bool
    where
        A: ObjectApi<K>,
        K: Resource<DynamicType = ()>,
    {
        let kind = K::kind(&());

        match self.api.delete(namespace, name).await {
            Ok(()) => {
                info!(kind = %kind, namespace = %namespace, name = %name, "Deleted");
                self.record_child_operation(&kind, "delete", Outcome::Success);
                true
            }
            Err(e) if e.is_not_found() => {
                debug!(kind = %kind, namespace = %namespace, name = %name, "Already deleted");
                self.record_child_operation(&kind, "delete", Outcome::Unchanged);
                true
            }
            Err(e) => {
                error!(kind = %kind, namespace = %namespace, name = %name, error = %e, "Failed to delete");
                self.record_child_operation(&kind, "delete", Outcome::Failure);
                false
            }
        }
    }
}
