//! Router configuration ConfigMap.
//!
//! mcrouter reads a JSON routing file of the form
//! `{"pools":{"default":{"servers":[...]}},"route":"PoolRoute|default"}`.
//! The config generator sidecar writes that file from live DNS; the optional
//! ConfigMap publishes the same structure pointing at the backend Service.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};

use crate::crd::Memcached;
use crate::resources::common::{
    MEMCACHED_PORT, backend_service_name, child_metadata, cluster_name, cluster_namespace,
    default_labels,
};
use crate::resources::deployments::ROUTER_CONFIG_FILE;

/// Name of the single pool every key is routed to.
pub const DEFAULT_POOL: &str = "default";

/// A named group of memcached servers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPool {
    pub servers: Vec<String>,
}

/// mcrouter routing configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub pools: BTreeMap<String, ConfigPool>,
    pub route: String,
}

impl RouterConfig {
    /// Route everything to one pool made of `servers` (sorted, so the output is stable).
    pub fn for_servers<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut servers: Vec<String> = servers.into_iter().map(Into::into).collect();
        servers.sort();
        servers.dedup();

        let mut pools = BTreeMap::new();
        pools.insert(DEFAULT_POOL.to_string(), ConfigPool { servers });

        Self {
            pools,
            route: format!("PoolRoute|{}", DEFAULT_POOL),
        }
    }

    /// Render as the JSON document mcrouter expects.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Fully qualified `host:port` of the backend Service.
pub fn backend_endpoint(resource: &Memcached) -> String {
    format!(
        "{}.{}.svc.cluster.local:{}",
        backend_service_name(resource),
        cluster_namespace(resource),
        MEMCACHED_PORT
    )
}

/// Generate the router ConfigMap.
pub fn generate_router_configmap(resource: &Memcached) -> Result<ConfigMap, serde_json::Error> {
    let config = RouterConfig::for_servers([backend_endpoint(resource)]);
    let name = cluster_name(resource);

    let mut data = BTreeMap::new();
    data.insert(ROUTER_CONFIG_FILE.to_string(), config.to_json()?);

    Ok(ConfigMap {
        metadata: child_metadata(resource, name.clone(), default_labels(Some(&name))),
        data: Some(data),
        ..Default::default()
    })
}
