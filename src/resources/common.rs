//! Common resource generation utilities.
//!
//! Every object the operator manages carries the same ownership labels. The
//! garbage collector and the deployment reaper select objects purely by these
//! labels, so every builder must go through the helpers in this module.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::Memcached;

/// Label identifying the operator that manages an object.
pub const OPERATED_BY_LABEL: &str = "operated-by";
/// Value of [`OPERATED_BY_LABEL`].
pub const OPERATED_BY: &str = "memcached.operator.kubestack.com";
/// Label shared by every kubestack component.
pub const HERITAGE_LABEL: &str = "heritage";
/// Value of [`HERITAGE_LABEL`].
pub const HERITAGE: &str = "kubestack.com";
/// Label carrying the owning Memcached resource name.
pub const CLUSTER_LABEL: &str = "cluster";
/// Label distinguishing the memcached pool from the router tier.
pub const SERVICE_TYPE_LABEL: &str = "service-type";
/// Label picked up by the Prometheus service monitor.
pub const MONITORING_LABEL: &str = "monitoring.kubestack.com";

/// memcached protocol port (servers and routers)
pub const MEMCACHED_PORT: i32 = 11211;
/// Prometheus exporter port
pub const METRICS_PORT: i32 = 9150;

/// Which tier of the cluster an object belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceType {
    /// memcached servers
    Memcached,
    /// mcrouter routers
    Mcrouter,
}

impl ServiceType {
    /// Label value for [`SERVICE_TYPE_LABEL`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Memcached => "memcached",
            ServiceType::Mcrouter => "mcrouter",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership labels, optionally scoped to one cluster.
pub fn default_labels(cluster: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(OPERATED_BY_LABEL.to_string(), OPERATED_BY.to_string());
    labels.insert(HERITAGE_LABEL.to_string(), HERITAGE.to_string());
    if let Some(name) = cluster {
        labels.insert(CLUSTER_LABEL.to_string(), name.to_string());
    }
    labels
}

/// Ownership labels plus the tier label for one cluster.
pub fn tier_labels(cluster: &str, service_type: ServiceType) -> BTreeMap<String, String> {
    let mut labels = default_labels(Some(cluster));
    labels.insert(
        SERVICE_TYPE_LABEL.to_string(),
        service_type.as_str().to_string(),
    );
    labels
}

/// Render labels as a `k=v,k=v` label selector.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector matching every object this operator owns, in any cluster.
pub fn default_label_selector() -> String {
    label_selector(&default_labels(None))
}

/// Name of the router Service, router ConfigMap and memcached Deployment.
pub fn cluster_name(resource: &Memcached) -> String {
    resource.name_any()
}

/// Name of the headless Service in front of the memcached pods.
pub fn backend_service_name(resource: &Memcached) -> String {
    format!("{}-backend", resource.name_any())
}

/// Name of the mcrouter Deployment.
pub fn router_deployment_name(resource: &Memcached) -> String {
    format!("{}-router", resource.name_any())
}

/// Namespace of the resource, falling back to `default`.
pub fn cluster_namespace(resource: &Memcached) -> String {
    resource
        .namespace()
        .unwrap_or_else(|| "default".to_string())
}

/// Object metadata shared by all children of a cluster.
pub fn child_metadata(
    resource: &Memcached,
    name: String,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(cluster_namespace(resource)),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Resource requirements with identical limits and requests (Guaranteed QoS).
pub fn guaranteed_resources(cpu: &str, memory: &str) -> ResourceRequirements {
    let quantities: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ]
    .into_iter()
    .collect();

    ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..Default::default()
    }
}
