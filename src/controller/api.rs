//! Access to the Kubernetes API.
//!
//! The controller only talks to the cluster through [`ObjectApi`] (child
//! objects) and [`MemcachedApi`] (the custom resource). [`KubeApi`] implements
//! both over a `kube::Client`; tests substitute an in-memory fake.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, StreamExt, future};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::controller::context::FIELD_MANAGER;
use crate::controller::dispatcher::ClusterEvent;
use crate::controller::error::{Error, Result};
use crate::crd::Memcached;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// CRUD and list access to one namespaced child kind.
#[async_trait]
pub trait ObjectApi<K>: Send + Sync {
    /// Read one object.
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    /// Create an object; an existing object yields [`Error::Conflict`].
    async fn create(&self, namespace: &str, object: &K) -> Result<K>;

    /// Strategic-merge patch an existing object.
    async fn patch(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<K>;

    /// Delete an object with background propagation.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// List objects matching a label selector, in one namespace or all of them.
    async fn list(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<K>>;
}

/// Read and watch access to `Memcached` resources.
#[async_trait]
pub trait MemcachedApi: Send + Sync {
    /// List clusters in all namespaces.
    async fn list_clusters(&self) -> Result<Vec<Memcached>>;

    /// Read one cluster.
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Memcached>;

    /// Open a watch over clusters in all namespaces.
    ///
    /// The stream ends when the server closes it, at the latest after
    /// `timeout_secs`.
    async fn watch_clusters<'a>(
        &'a self,
        resource_version: &str,
        timeout_secs: u32,
    ) -> Result<BoxStream<'a, Result<ClusterEvent>>>;
}

/// Everything the controller needs from the cluster.
pub trait ClusterApi:
    MemcachedApi
    + ObjectApi<Service>
    + ObjectApi<Deployment>
    + ObjectApi<ConfigMap>
    + ObjectApi<ReplicaSet>
{
}

impl<T> ClusterApi for T where
    T: MemcachedApi
        + ObjectApi<Service>
        + ObjectApi<Deployment>
        + ObjectApi<ConfigMap>
        + ObjectApi<ReplicaSet>
{
}

/// [`ClusterApi`] backed by a live API server.
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<K> ObjectApi<K> for KubeApi
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, &K::kind(&()), namespace, name))
    }

    async fn create(&self, namespace: &str, object: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&params, object).await.map_err(|e| {
            let name = object.meta().name.as_deref().unwrap_or_default();
            Error::from_kube(e, &K::kind(&()), namespace, name)
        })
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.patch(name, &params, &Patch::Strategic(patch))
            .await
            .map_err(|e| Error::from_kube(e, &K::kind(&()), namespace, name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, &K::kind(&()), namespace, name))
    }

    async fn list(&self, namespace: Option<&str>, selector: &str) -> Result<Vec<K>> {
        let api: Api<K> = scoped_api(self.client.clone(), namespace);
        api.list(&ListParams::default().labels(selector))
            .await
            .map(|list| list.items)
            .map_err(|e| Error::from_kube(e, &K::kind(&()), namespace.unwrap_or("*"), "*"))
    }
}

#[async_trait]
impl MemcachedApi for KubeApi {
    async fn list_clusters(&self) -> Result<Vec<Memcached>> {
        let api: Api<Memcached> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| Error::from_kube(e, "Memcached", "*", "*"))
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Memcached> {
        let api: Api<Memcached> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, "Memcached", namespace, name))
    }

    async fn watch_clusters<'a>(
        &'a self,
        resource_version: &str,
        timeout_secs: u32,
    ) -> Result<BoxStream<'a, Result<ClusterEvent>>> {
        // Read line by line so unknown event types reach the ignored arm
        let params = WatchParams::default().timeout(timeout_secs);
        let mut request = kube::core::Request::new(Memcached::url_path(&(), None))
            .watch(&params, resource_version)
            .map_err(|e| Error::Kube(kube::Error::BuildRequest(e)))?;
        request.extensions_mut().insert("watch");

        let lines = self
            .client
            .request_stream(request)
            .await
            .map_err(|e| Error::from_kube(e, "Memcached", "*", "*"))?
            .lines();

        Ok(lines
            .filter_map(|line| {
                future::ready(match line {
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => Some(decode_watch_line(&line)),
                    Err(e) => Some(Err(Error::Kube(kube::Error::ReadEvents(e)))),
                })
            })
            .boxed())
    }
}

/// One line of a watch response, before the type tag is interpreted.
#[derive(Debug, Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    object: Option<serde_json::Value>,
    // A bare Status object sent instead of an event
    kind: Option<String>,
    code: Option<u16>,
    message: Option<String>,
}

/// Decode one watch line into a dispatcher event.
///
/// ADDED, MODIFIED and DELETED carry a `Memcached`; ERROR carries a Status and
/// becomes [`Error::Watch`]; any other tag is ignored.
pub fn decode_watch_line(line: &str) -> Result<ClusterEvent> {
    let raw: RawWatchEvent =
        serde_json::from_str(line).map_err(|e| Error::MalformedEvent(e.to_string()))?;

    let Some(event_type) = raw.event_type else {
        if raw.kind.as_deref() == Some("Status") {
            if let Some(code) = raw.code {
                return Err(Error::Watch {
                    code,
                    message: raw.message.unwrap_or_default(),
                });
            }
        }
        let reason = if raw.object.is_some() {
            "missing type"
        } else {
            "missing type and object"
        };
        return Err(Error::MalformedEvent(reason.to_string()));
    };

    let object = raw.object;
    let without_object = || Error::MalformedEvent(format!("{} without object", event_type));

    match event_type.as_str() {
        "ADDED" | "MODIFIED" | "DELETED" => {
            let object = object.ok_or_else(without_object)?;
            let resource: Memcached = serde_json::from_value(object)
                .map_err(|e| Error::MalformedEvent(e.to_string()))?;
            Ok(match event_type.as_str() {
                "ADDED" => ClusterEvent::Added(resource),
                "MODIFIED" => ClusterEvent::Modified(resource),
                _ => ClusterEvent::Deleted(resource),
            })
        }
        "ERROR" => {
            let status = object.ok_or_else(without_object)?;
            Err(Error::Watch {
                code: status
                    .get("code")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|code| u16::try_from(code).ok())
                    .unwrap_or(500),
                message: status
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        }
        _ => Ok(ClusterEvent::Ignored {
            resource_version: object
                .as_ref()
                .and_then(|o| o.pointer("/metadata/resourceVersion"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            event_type: event_type.clone(),
        }),
    }
}
