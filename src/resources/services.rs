//! Service generation for memcached clusters.
//!
//! Creates two services:
//! - **Router Service** (`<name>`): client entry point, load-balanced over mcrouter pods
//! - **Backend Service** (`<name>-backend`): headless, resolves to memcached pod IPs
//!   for the router config generator

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::Memcached;
use crate::resources::common::{
    MEMCACHED_PORT, METRICS_PORT, MONITORING_LABEL, ServiceType, backend_service_name,
    child_metadata, cluster_name, tier_labels,
};

/// Both services expose the memcached protocol and the exporter port.
fn service_ports() -> Vec<ServicePort> {
    vec![
        ServicePort {
            name: Some("memcached".to_string()),
            port: MEMCACHED_PORT,
            target_port: Some(IntOrString::Int(MEMCACHED_PORT)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
        ServicePort {
            name: Some("metrics".to_string()),
            port: METRICS_PORT,
            target_port: Some(IntOrString::Int(METRICS_PORT)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
    ]
}

fn service_for(resource: &Memcached, name: String, service_type: ServiceType) -> Service {
    let selector = tier_labels(&cluster_name(resource), service_type);
    let mut labels = selector.clone();
    // Picked up by the Prometheus service monitor
    labels.insert(MONITORING_LABEL.to_string(), "metrics".to_string());

    let cluster_ip = match service_type {
        ServiceType::Memcached => Some("None".to_string()),
        ServiceType::Mcrouter => None,
    };

    Service {
        metadata: child_metadata(resource, name, labels),
        spec: Some(ServiceSpec {
            cluster_ip,
            selector: Some(selector),
            ports: Some(service_ports()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the router Service clients connect to.
pub fn generate_router_service(resource: &Memcached) -> Service {
    service_for(resource, cluster_name(resource), ServiceType::Mcrouter)
}

/// Generate the headless backend Service.
///
/// No cluster IP: DNS returns one A record per memcached pod, which is what the
/// router's config generator resolves to build its server pool.
pub fn generate_backend_service(resource: &Memcached) -> Service {
    service_for(resource, backend_service_name(resource), ServiceType::Memcached)
}
