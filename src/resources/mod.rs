//! Resource generation module.
//!
//! Pure builders turning a `Memcached` resource into the child objects the
//! operator keeps converged.
//!
//! ## Resources Generated
//!
//! | Resource | Name | Purpose |
//! |----------|------|---------|
//! | Service | `<name>` | Client entry point (mcrouter) |
//! | Service | `<name>-backend` | Headless discovery of memcached pods |
//! | Deployment | `<name>` | memcached servers + exporter |
//! | Deployment | `<name>-router` | mcrouter + config generator + exporter |
//! | ConfigMap | `<name>` | Routing configuration (optional) |

pub mod common;
pub mod configmap;
pub mod deployments;
pub mod services;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};

use crate::crd::Memcached;

pub use common::{default_label_selector, default_labels};

/// Every child object one cluster should have, in creation order.
#[derive(Clone, Debug)]
pub struct DesiredChildren {
    /// Router Service, then backend Service.
    pub services: [Service; 2],
    /// memcached Deployment, then router Deployment.
    pub deployments: [Deployment; 2],
    pub configmap: Option<ConfigMap>,
}

impl DesiredChildren {
    /// Build the desired children of `resource`.
    pub fn for_cluster(
        resource: &Memcached,
        router_configmap: bool,
    ) -> Result<Self, serde_json::Error> {
        let configmap = if router_configmap {
            Some(configmap::generate_router_configmap(resource)?)
        } else {
            None
        };

        Ok(Self {
            services: [
                services::generate_router_service(resource),
                services::generate_backend_service(resource),
            ],
            deployments: [
                deployments::generate_memcached_deployment(resource),
                deployments::generate_router_deployment(resource),
            ],
            configmap,
        })
    }
}
