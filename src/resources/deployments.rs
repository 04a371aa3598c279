//! Deployment generation for memcached clusters.
//!
//! Two Deployments per cluster:
//! - `<name>`: memcached servers plus a Prometheus exporter sidecar
//! - `<name>-router`: mcrouter, a config generator sidecar that keeps the
//!   routing pool in sync with the backend Service, and an exporter sidecar

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::crd::Memcached;
use crate::resources::common::{
    MEMCACHED_PORT, METRICS_PORT, ServiceType, backend_service_name, child_metadata,
    cluster_name, guaranteed_resources, router_deployment_name, tier_labels,
};

const MEMCACHED_IMAGE: &str = "memcached:1.4.33";
const MEMCACHED_EXPORTER_IMAGE: &str = "prom/memcached-exporter:v0.3.0";
const MCROUTER_IMAGE: &str = "kubestack/mcrouter:v0.36.0-kubestack";
const CONFIG_GENERATOR_IMAGE: &str = "kubestack/mcrouter-sidecar:v0.1.0";
const MCROUTER_EXPORTER_IMAGE: &str = "kubestack/mcrouter_exporter:v0.0.1";

/// Exporter sidecars are tiny and fixed-size.
const EXPORTER_CPU: &str = "50m";
const EXPORTER_MEMORY: &str = "16Mi";
const CONFIG_GENERATOR_CPU: &str = "10m";
const CONFIG_GENERATOR_MEMORY: &str = "16Mi";

/// Shared ephemeral volume holding the generated router configuration.
const ROUTER_CONFIG_VOLUME: &str = "mcrouter-config";
const ROUTER_CONFIG_DIR: &str = "/etc/mcrouter";
/// File name of the generated router configuration.
pub const ROUTER_CONFIG_FILE: &str = "mcrouter.conf";

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn deployment_for(
    resource: &Memcached,
    name: String,
    service_type: ServiceType,
    replicas: i32,
    pod_spec: PodSpec,
) -> Deployment {
    let labels = tier_labels(&cluster_name(resource), service_type);

    Deployment {
        metadata: child_metadata(resource, name, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the memcached server Deployment.
pub fn generate_memcached_deployment(resource: &Memcached) -> Deployment {
    let spec = &resource.spec.memcached;

    let memcached = Container {
        name: "memcached".to_string(),
        image: Some(MEMCACHED_IMAGE.to_string()),
        command: Some(vec![
            "memcached".to_string(),
            "-p".to_string(),
            MEMCACHED_PORT.to_string(),
        ]),
        ports: Some(vec![container_port("memcached", MEMCACHED_PORT)]),
        resources: Some(guaranteed_resources(&spec.cpu_limit, &spec.memory_limit)),
        ..Default::default()
    };

    let metrics = Container {
        name: "metrics".to_string(),
        image: Some(MEMCACHED_EXPORTER_IMAGE.to_string()),
        ports: Some(vec![container_port("metrics", METRICS_PORT)]),
        resources: Some(guaranteed_resources(EXPORTER_CPU, EXPORTER_MEMORY)),
        ..Default::default()
    };

    deployment_for(
        resource,
        cluster_name(resource),
        ServiceType::Memcached,
        spec.replicas,
        PodSpec {
            containers: vec![memcached, metrics],
            ..Default::default()
        },
    )
}

/// Generate the mcrouter Deployment.
///
/// mcrouter and the config generator share an `emptyDir`; the generator
/// resolves the headless backend Service and rewrites the routing file
/// whenever the set of memcached pods changes.
pub fn generate_router_deployment(resource: &Memcached) -> Deployment {
    let spec = &resource.spec.router;
    let config_path = format!("{}/{}", ROUTER_CONFIG_DIR, ROUTER_CONFIG_FILE);
    let config_mount = VolumeMount {
        name: ROUTER_CONFIG_VOLUME.to_string(),
        mount_path: ROUTER_CONFIG_DIR.to_string(),
        ..Default::default()
    };

    let mcrouter = Container {
        name: "mcrouter".to_string(),
        image: Some(MCROUTER_IMAGE.to_string()),
        command: Some(vec![
            "mcrouter".to_string(),
            "-p".to_string(),
            MEMCACHED_PORT.to_string(),
            format!("--config-file={}", config_path),
        ]),
        ports: Some(vec![container_port("memcached", MEMCACHED_PORT)]),
        resources: Some(guaranteed_resources(&spec.cpu_limit, &spec.memory_limit)),
        volume_mounts: Some(vec![config_mount.clone()]),
        ..Default::default()
    };

    let config_generator = Container {
        name: "config-generator".to_string(),
        image: Some(CONFIG_GENERATOR_IMAGE.to_string()),
        args: Some(vec![
            "-output".to_string(),
            config_path,
            backend_service_name(resource),
        ]),
        resources: Some(guaranteed_resources(
            CONFIG_GENERATOR_CPU,
            CONFIG_GENERATOR_MEMORY,
        )),
        volume_mounts: Some(vec![config_mount]),
        ..Default::default()
    };

    let metrics = Container {
        name: "metrics".to_string(),
        image: Some(MCROUTER_EXPORTER_IMAGE.to_string()),
        args: Some(vec![format!(
            "-mcrouter.address=localhost:{}",
            MEMCACHED_PORT
        )]),
        ports: Some(vec![container_port("metrics", METRICS_PORT)]),
        resources: Some(guaranteed_resources(EXPORTER_CPU, EXPORTER_MEMORY)),
        ..Default::default()
    };

    deployment_for(
        resource,
        router_deployment_name(resource),
        ServiceType::Mcrouter,
        spec.replicas,
        PodSpec {
            containers: vec![mcrouter, config_generator, metrics],
            volumes: Some(vec![Volume {
                name: ROUTER_CONFIG_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            }]),
            ..Default::default()
        },
    )
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::{MemcachedPoolSpec, MemcachedSpec, RouterSpec};
    use crate::resources::common::SERVICE_TYPE_LABEL;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn test_resource(name: &str) -> Memcached {
        let mut resource = Memcached::new(
            name,
            MemcachedSpec {
                memcached: MemcachedPoolSpec {
                    replicas: 3,
                    cpu_limit: "200m".to_string(),
                    memory_limit: "128Mi".to_string(),
                },
                router: RouterSpec::default(),
            },
        );
        resource.metadata.namespace = Some("default".to_string());
        resource
    }

    #[test]
    fn test_generate_memcached_deployment() {
        let resource = test_resource("my-cluster");
        let deploy = generate_memcached_deployment(&resource);

        assert_eq!(deploy.metadata.name, Some("my-cluster".to_string()));
        let spec = deploy.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));

        let pod = spec.template.spec.unwrap();
        let names: Vec<&str> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["memcached", "metrics"]);

        let limits = pod.containers[0]
            .resources
            .as_ref()
            .unwrap()
            .limits
            .as_ref()
            .unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("200m".to_string())));
        assert_eq!(limits.get("memory"), Some(&Quantity("128Mi".to_string())));
    }

    #[test]
    fn test_generate_router_deployment() {
        let resource = test_resource("my-cluster");
        let deploy = generate_router_deployment(&resource);

        assert_eq!(deploy.metadata.name, Some("my-cluster-router".to_string()));
        let spec = deploy.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));

        let pod = spec.template.spec.unwrap();
        let names: Vec<&str> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["mcrouter", "config-generator", "metrics"]);

        let generator_args = pod.containers[1].args.as_ref().unwrap();
        assert_eq!(
            generator_args.last(),
            Some(&"my-cluster-backend".to_string())
        );

        let volumes = pod.volumes.unwrap();
        assert_eq!(volumes.len(), 1);
        assert!(volumes[0].empty_dir.is_some());
        for container in &pod.containers[0..2] {
            let mounts = container.volume_mounts.as_ref().unwrap();
            assert_eq!(mounts[0].name, volumes[0].name);
        }
    }

    #[test]
    fn test_selector_matches_template_labels() {
        let resource = test_resource("my-cluster");
        for (deploy, tier) in [
            (generate_memcached_deployment(&resource), "memcached"),
            (generate_router_deployment(&resource), "mcrouter"),
        ] {
            let spec = deploy.spec.unwrap();
            let selector = spec.selector.match_labels.unwrap();
            let template_labels = spec.template.metadata.unwrap().labels.unwrap();
            assert_eq!(selector, template_labels);
            assert_eq!(selector.get(SERVICE_TYPE_LABEL), Some(&tier.to_string()));
            assert_eq!(deploy.metadata.labels.unwrap(), selector);
        }
    }
}
