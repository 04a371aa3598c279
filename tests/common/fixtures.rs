//! Test fixtures and builder patterns for Memcached.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use memcached_operator::crd::{Memcached, MemcachedPoolSpec, MemcachedSpec, RouterSpec};

/// Builder for creating Memcached test fixtures.
///
/// # Example
/// ```ignore
/// let resource = MemcachedBuilder::new("sessions")
///     .namespace("cache")
///     .memcached_replicas(3)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct MemcachedBuilder {
    name: String,
    namespace: Option<String>,
    memcached: MemcachedPoolSpec,
    router: RouterSpec,
    uid: Option<String>,
    resource_version: Option<String>,
}

impl MemcachedBuilder {
    /// Create a new builder with the given resource name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            memcached: MemcachedPoolSpec::default(),
            router: RouterSpec::default(),
            uid: None,
            resource_version: None,
        }
    }

    /// Set the namespace for the resource.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the number of memcached pods.
    pub fn memcached_replicas(mut self, replicas: i32) -> Self {
        self.memcached.replicas = replicas;
        self
    }

    /// Set the memcached memory limit.
    pub fn memcached_memory(mut self, memory: impl Into<String>) -> Self {
        self.memcached.memory_limit = memory.into();
        self
    }

    /// Set the number of mcrouter pods.
    pub fn router_replicas(mut self, replicas: i32) -> Self {
        self.router.replicas = replicas;
        self
    }

    /// Set the UID.
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Set the resourceVersion (watch resumption tests).
    pub fn resource_version(mut self, version: impl Into<String>) -> Self {
        self.resource_version = Some(version.into());
        self
    }

    /// Build the Memcached.
    pub fn build(self) -> Memcached {
        Memcached {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: self.namespace,
                uid: self.uid,
                resource_version: self.resource_version,
                ..Default::default()
            },
            spec: MemcachedSpec {
                memcached: self.memcached,
                router: self.router,
            },
        }
    }
}

impl Default for MemcachedBuilder {
    fn default() -> Self {
        Self::new("sessions")
    }
}

/// Create a Memcached with defaults in `namespace`.
pub fn test_cluster(name: &str, namespace: &str) -> Memcached {
    MemcachedBuilder::new(name)
        .namespace(namespace)
        .uid(format!("test-uid-{}", name))
        .build()
}
