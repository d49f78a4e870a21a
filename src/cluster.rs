// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Live cluster access outside the watch caches.
//!
//! The reconciliation core reads almost everything from caches. The few calls that
//! must hit the API server (named-port refresh, status publication, node lookups)
//! go through [`ClusterClient`] so they can be replaced in tests.

use crate::retry::{is_not_found, retry_api_call};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressLoadBalancerIngress};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use std::collections::BTreeMap;

/// Field manager recorded on every patch issued by the controller
const FIELD_MANAGER: &str = "ingress-controller";

/// API server operations used by the Builder and Status Sync.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Lists pods in `namespace` matching a label selector string (`k=v,k2=v2`).
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    /// Fetches a single pod, `None` when it does not exist.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Fetches a service directly from the API server.
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Merges `annotations` into the service metadata.
    async fn update_service_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Fetches a node, `None` when it does not exist.
    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    /// Fetches the current version of an ingress.
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>>;

    /// Replaces the published load-balancer addresses of an ingress.
    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        addresses: Vec<IngressLoadBalancerIngress>,
    ) -> Result<()>;
}

/// [`ClusterClient`] backed by a `kube::Client` with retries on transient errors.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Maps a 404 to `None` and keeps every other error.
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(label_selector);
        let pods = retry_api_call(
            || async { api.list(&params).await },
            &format!("list pods {namespace}/{label_selector}"),
        )
        .await?;
        Ok(pods.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        optional(retry_api_call(|| api.get(name), &format!("get pod {namespace}/{name}")).await)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        optional(
            retry_api_call(|| api.get(name), &format!("get service {namespace}/{name}")).await,
        )
    }

    async fn update_service_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "annotations": annotations } });
        let params = PatchParams::apply(FIELD_MANAGER);
        retry_api_call(
            || api.patch(name, &params, &Patch::Merge(&patch)),
            &format!("annotate service {namespace}/{name}"),
        )
        .await?;
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        optional(retry_api_call(|| api.get(name), &format!("get node {name}")).await)
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        optional(
            retry_api_call(|| api.get(name), &format!("get ingress {namespace}/{name}")).await,
        )
    }

    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        addresses: Vec<IngressLoadBalancerIngress>,
    ) -> Result<()> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": { "loadBalancer": { "ingress": addresses } } });
        let params = PatchParams::default();
        retry_api_call(
            || api.patch_status(name, &params, &Patch::Merge(&patch)),
            &format!("update ingress status {namespace}/{name}"),
        )
        .await?;
        Ok(())
    }
}

/// Renders a label map as a selector string (`k=v,k2=v2`), sorted by key.
#[must_use]
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
