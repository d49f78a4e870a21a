// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Fixtures and an in-memory [`ClusterClient`] shared by unit tests.

use crate::cluster::ClusterClient;
use crate::store::{object_key, Cache};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Node, Pod, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressLoadBalancerIngress,
    IngressLoadBalancerStatus, IngressRule, IngressServiceBackend, IngressSpec, IngressStatus,
    ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::runtime::watcher::Event;
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Synced cache holding `objects`.
pub fn cache<K>(objects: Vec<K>) -> Arc<Cache<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (reader, mut writer) = kube::runtime::reflector::store::<K>();
    for obj in objects {
        writer.apply_watcher_event(&Event::Apply(obj));
    }
    let cache = Cache::new(reader);
    cache.mark_synced();
    Arc::new(cache)
}

pub fn path_backend(service: &str, port: i32) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: service.to_string(),
            port: Some(ServiceBackendPort {
                number: Some(port),
                name: None,
            }),
        }),
        resource: None,
    }
}

/// Ingress routing `host` + `path` to `service:port`.
pub fn ingress(namespace: &str, name: &str, host: &str, path: &str, service: &str, port: i32) -> Ingress {
    Ingress {
        metadata: meta(namespace, name),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        backend: path_backend(service, port),
                        path: Some(path.to_string()),
                        path_type: "Prefix".to_string(),
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn with_annotations(mut ing: Ingress, pairs: &[(&str, &str)]) -> Ingress {
    ing.metadata.annotations = Some(
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    );
    ing
}

pub fn service(namespace: &str, name: &str, port: i32, target: IntOrString) -> Service {
    Service {
        metadata: meta(namespace, name),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(target),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            cluster_ip: Some("10.96.0.10".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn endpoints(namespace: &str, name: &str, ips: &[&str], port: i32) -> Endpoints {
    Endpoints {
        metadata: meta(namespace, name),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                ips.iter()
                    .map(|ip| EndpointAddress {
                        ip: (*ip).to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![EndpointPort {
                port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

/// In-memory [`ClusterClient`] counting writes.
#[derive(Default)]
pub struct RecordingClusterClient {
    pub pods: Mutex<Vec<Pod>>,
    pub services: Mutex<BTreeMap<String, Service>>,
    pub nodes: Mutex<BTreeMap<String, Node>>,
    pub ingresses: Mutex<BTreeMap<String, Ingress>>,
    pub list_pod_calls: AtomicUsize,
    pub annotation_writes: AtomicUsize,
    pub status_writes: AtomicUsize,
}

impl RecordingClusterClient {
    pub fn add_ingress(&self, ing: Ingress) {
        self.ingresses.lock().unwrap().insert(object_key(&ing), ing);
    }

    pub fn published(&self, key: &str) -> Vec<IngressLoadBalancerIngress> {
        self.ingresses
            .lock()
            .unwrap()
            .get(key)
            .and_then(|ing| ing.status.as_ref())
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.clone())
            .unwrap_or_default()
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClient for RecordingClusterClient {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        self.list_pod_calls.fetch_add(1, Ordering::SeqCst);
        let wanted: Vec<(&str, &str)> = label_selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| {
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                wanted
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .find(|pod| {
                pod.metadata.namespace.as_deref() == Some(namespace)
                    && pod.metadata.name.as_deref() == Some(name)
            })
            .cloned())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned())
    }

    async fn update_service_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        self.annotation_writes.fetch_add(1, Ordering::SeqCst);
        if let Some(svc) = self
            .services
            .lock()
            .unwrap()
            .get_mut(&format!("{namespace}/{name}"))
        {
            svc.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations);
        }
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.nodes.lock().unwrap().get(name).cloned())
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>> {
        Ok(self
            .ingresses
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned())
    }

    async fn update_ingress_status(
        &self,
        namespace: &str,
        name: &str,
        addresses: Vec<IngressLoadBalancerIngress>,
    ) -> Result<()> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        if let Some(ing) = self
            .ingresses
            .lock()
            .unwrap()
            .get_mut(&format!("{namespace}/{name}"))
        {
            ing.status = Some(IngressStatus {
                load_balancer: Some(IngressLoadBalancerStatus {
                    ingress: Some(addresses),
                }),
            });
        }
        Ok(())
    }
}
