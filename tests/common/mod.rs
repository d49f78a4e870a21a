// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingress_core::backend::{JsonFileBackend, ProxyBackend};
use ingress_core::builder::{Builder, BuilderSettings};
use ingress_core::cluster::ClusterClient;
use ingress_core::constants::{SECRET_TLS_CERT_KEY, SECRET_TLS_KEY_KEY};
use ingress_core::context::{Caches, Writers};
use ingress_core::annotations::IngressClassFilter;
use ingress_core::model::Configuration;
use ingress_core::ssl::{generate_self_signed, CertificateTracker, SecretSynchronizer};
use ingress_core::sync::SyncEngine;
use k8s_openapi::api::core::v1::{
    ConfigMap, EndpointAddress, EndpointPort, EndpointSubset, Endpoints, LoadBalancerIngress,
    LoadBalancerStatus, Node, Pod, Secret, Service, ServicePort, ServiceSpec, ServiceStatus,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressLoadBalancerIngress,
    IngressLoadBalancerStatus, IngressRule, IngressServiceBackend, IngressSpec, IngressStatus,
    IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::runtime::watcher::Event;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DEFAULT_BACKEND: &str = "default/default-http-backend";

pub fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Ingress routing `host` + `path` to `service:port`, created `created` seconds
/// after the epoch.
pub fn ingress(name: &str, host: &str, path: &str, service: &str, port: i32, created: i64) -> Ingress {
    let mut metadata = meta("default", name);
    metadata.creation_timestamp = DateTime::<Utc>::from_timestamp(created, 0).map(Time);
    Ingress {
        metadata,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(port),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
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

pub fn with_tls(mut ing: Ingress, hosts: &[&str], secret: &str) -> Ingress {
    if let Some(spec) = ing.spec.as_mut() {
        spec.tls = Some(vec![IngressTLS {
            hosts: Some(hosts.iter().map(|h| (*h).to_string()).collect()),
            secret_name: Some(secret.to_string()),
        }]);
    }
    ing
}

pub fn service(name: &str, port: i32, target_port: i32) -> Service {
    Service {
        metadata: meta("default", name),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(target_port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            cluster_ip: Some("10.96.0.10".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn endpoints(name: &str, ips: &[&str], port: i32) -> Endpoints {
    Endpoints {
        metadata: meta("default", name),
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

/// TLS secret holding a fresh self-signed key pair for `hosts`.
pub fn tls_secret(name: &str, hosts: &[&str]) -> Secret {
    let (cert, key) = generate_self_signed(hosts).expect("self-signed certificate");
    Secret {
        metadata: meta("default", name),
        data: Some(BTreeMap::from([
            (SECRET_TLS_CERT_KEY.to_string(), ByteString(cert.into_bytes())),
            (SECRET_TLS_KEY_KEY.to_string(), ByteString(key.into_bytes())),
        ])),
        ..Default::default()
    }
}

pub fn load_balancer_service(namespace: &str, name: &str, ips: &[&str]) -> Service {
    Service {
        metadata: meta(namespace, name),
        spec: None,
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(
                    ips.iter()
                        .map(|ip| LoadBalancerIngress {
                            ip: Some((*ip).to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
            }),
            conditions: None,
        }),
    }
}

/// In-memory API server for the calls that bypass the caches.
#[derive(Default)]
pub struct FakeCluster {
    pub services: Mutex<BTreeMap<String, Service>>,
    pub ingresses: Mutex<BTreeMap<String, Ingress>>,
    pub status_writes: AtomicUsize,
}

impl FakeCluster {
    pub fn add_ingress(&self, ing: &Ingress) {
        let key = format!(
            "{}/{}",
            ing.metadata.namespace.as_deref().unwrap_or_default(),
            ing.metadata.name.as_deref().unwrap_or_default()
        );
        self.ingresses.lock().unwrap().insert(key, ing.clone());
    }

    pub fn add_service(&self, svc: Service) {
        let key = format!(
            "{}/{}",
            svc.metadata.namespace.as_deref().unwrap_or_default(),
            svc.metadata.name.as_deref().unwrap_or_default()
        );
        self.services.lock().unwrap().insert(key, svc);
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
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
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_pods(&self, _namespace: &str, _label_selector: &str) -> Result<Vec<Pod>> {
        Ok(Vec::new())
    }

    async fn get_pod(&self, _namespace: &str, _name: &str) -> Result<Option<Pod>> {
        Ok(None)
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
        _namespace: &str,
        _name: &str,
        _annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_node(&self, _name: &str) -> Result<Option<Node>> {
        Ok(None)
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

/// Fully wired reconciliation core writing to a temporary directory.
pub struct Harness {
    pub caches: Caches,
    pub writers: Writers,
    pub tracker: Arc<CertificateTracker>,
    pub synchronizer: Arc<SecretSynchronizer>,
    pub backend: Arc<JsonFileBackend>,
    pub cluster: Arc<FakeCluster>,
    pub engine: SyncEngine,
    pub dir: tempfile::TempDir,
}

impl Harness {
    /// Synced caches holding the default backend service with one endpoint.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let (caches, mut writers) = Caches::new();
        writers
            .services
            .apply_watcher_event(&Event::Apply(service("default-http-backend", 80, 8080)));
        writers.endpoints.apply_watcher_event(&Event::Apply(endpoints(
            "default-http-backend",
            &["10.0.0.9"],
            8080,
        )));
        caches.ingresses.mark_synced();
        caches.services.mark_synced();
        caches.endpoints.mark_synced();
        caches.secrets.mark_synced();
        caches.configmaps.mark_synced();

        let class_filter = IngressClassFilter::new(None, "nginx");
        let tracker = Arc::new(CertificateTracker::new());
        let cluster = Arc::new(FakeCluster::default());
        let synchronizer = Arc::new(SecretSynchronizer::new(
            caches.secrets.clone(),
            caches.ingresses.clone(),
            tracker.clone(),
            class_filter.clone(),
            dir.path().join("ssl"),
            None,
        ));
        let backend = Arc::new(JsonFileBackend::new(dir.path().join("conf").join("configuration.json")));

        let builder = Builder::new(
            caches.services.clone(),
            caches.endpoints.clone(),
            caches.secrets.clone(),
            caches.configmaps.clone(),
            tracker.clone(),
            cluster.clone(),
            BuilderSettings {
                default_backend_service: DEFAULT_BACKEND.to_string(),
                class_filter,
                sentinel_address: "127.0.0.1".to_string(),
                sentinel_port: "8181".to_string(),
                tcp_services_configmap: None,
                udp_services_configmap: None,
                auth_dir: dir.path().join("auth"),
            },
        );
        let proxy: Arc<dyn ProxyBackend> = backend.clone();
        let engine = SyncEngine::new(
            builder,
            proxy,
            synchronizer.clone(),
            caches.ingresses.clone(),
            caches.configmaps.clone(),
            None,
        )
        .with_rate_limit(1000.0, 100);

        Self {
            caches,
            writers,
            tracker,
            synchronizer,
            backend,
            cluster,
            engine,
            dir,
        }
    }

    pub fn apply_ingress(&mut self, ing: Ingress) {
        self.writers.ingresses.apply_watcher_event(&Event::Apply(ing));
    }

    pub fn apply_service(&mut self, svc: Service) {
        self.writers.services.apply_watcher_event(&Event::Apply(svc));
    }

    pub fn apply_endpoints(&mut self, ep: Endpoints) {
        self.writers.endpoints.apply_watcher_event(&Event::Apply(ep));
    }

    pub fn apply_secret(&mut self, secret: Secret) {
        self.writers.secrets.apply_watcher_event(&Event::Apply(secret));
    }

    pub fn apply_configmap(&mut self, cm: ConfigMap) {
        self.writers.configmaps.apply_watcher_event(&Event::Apply(cm));
    }

    /// Runs one pass and returns the running configuration.
    pub async fn sync(&self) -> Configuration {
        self.engine.sync().await.expect("sync pass");
        self.engine
            .running_configuration()
            .expect("running configuration")
    }

    /// Document written by the JSON backend.
    pub fn rendered(&self) -> serde_json::Value {
        let bytes = std::fs::read(self.backend.output()).expect("rendered configuration");
        serde_json::from_slice(&bytes).expect("valid JSON")
    }
}

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<kube::Client> {
    match kube::Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}
