//! Memcached Custom Resource Definition.
//!
//! A `Memcached` resource describes one logical cache cluster: a pool of
//! memcached servers and the mcrouter tier that fronts them. The operator
//! only reads these resources; cluster operators create, edit and delete them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Memcached is a custom resource describing a memcached + mcrouter cluster.
///
/// Example:
/// ```yaml
/// apiVersion: kubestack.com/v1
/// kind: Memcached
/// metadata:
///   name: sessions
/// spec:
///   memcached:
///     replicas: 3
///     memoryLimit: 256Mi
///   router:
///     replicas: 2
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kubestack.com",
    version = "v1",
    kind = "Memcached",
    plural = "memcacheds",
    shortname = "mc",
    namespaced,
    printcolumn = r#"{"name":"Memcached", "type":"integer", "jsonPath":".spec.memcached.replicas"}"#,
    printcolumn = r#"{"name":"Routers", "type":"integer", "jsonPath":".spec.router.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedSpec {
    /// Cache server pool.
    #[serde(default)]
    pub memcached: MemcachedPoolSpec,

    /// mcrouter tier.
    #[serde(default)]
    pub router: RouterSpec,
}

/// Cache server pool configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedPoolSpec {
    /// Number of memcached pods (default 2).
    #[serde(default = "default_memcached_replicas")]
    pub replicas: i32,

    /// CPU limit and request for the memcached container (default: 100m).
    #[serde(default = "default_memcached_cpu_limit")]
    pub cpu_limit: String,

    /// Memory limit and request for the memcached container (default: 64Mi).
    #[serde(default = "default_memcached_memory_limit")]
    pub memory_limit: String,
}

impl Default for MemcachedPoolSpec {
    fn default() -> Self {
        Self {
            replicas: default_memcached_replicas(),
            cpu_limit: default_memcached_cpu_limit(),
            memory_limit: default_memcached_memory_limit(),
        }
    }
}

fn default_memcached_replicas() -> i32 {
    2
}

fn default_memcached_cpu_limit() -> String {
    "100m".to_string()
}

fn default_memcached_memory_limit() -> String {
    "64Mi".to_string()
}

/// mcrouter tier configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouterSpec {
    /// Number of mcrouter pods (default 1).
    #[serde(default = "default_router_replicas")]
    pub replicas: i32,

    /// CPU limit and request for the mcrouter container (default: 50m).
    #[serde(default = "default_router_cpu_limit")]
    pub cpu_limit: String,

    /// Memory limit and request for the mcrouter container (default: 32Mi).
    #[serde(default = "default_router_memory_limit")]
    pub memory_limit: String,
}

impl Default for RouterSpec {
    fn default() -> Self {
        Self {
            replicas: default_router_replicas(),
            cpu_limit: default_router_cpu_limit(),
            memory_limit: default_router_memory_limit(),
        }
    }
}

fn default_router_replicas() -> i32 {
    1
}

fn default_router_cpu_limit() -> String {
    "50m".to_string()
}

fn default_router_memory_limit() -> String {
    "32Mi".to_string()
}
