// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backend Model Builder.
//!
//! Turns the managed `Ingress` objects plus the service, endpoint, secret and
//! ConfigMap caches into a [`Configuration`] snapshot. A pass never fails: any
//! Backend whose service, port or endpoints cannot be resolved is degraded to the
//! sentinel endpoint and the pass carries on.
//!
//! ## Pass layout
//!
//! 1. Managed rules are ordered by (creation timestamp, namespace, name) so that
//!    first-wins decisions are stable across passes.
//! 2. Annotations are extracted once per rule.
//! 3. Backends: the default Backend, then every unseen per-rule default backend and
//!    path backend.
//! 4. Servers: the default Server and one per distinct hostname, then TLS binding.
//! 5. Locations, with the first non-default assignment of a path winning.
//! 6. SSL passthrough descriptors, the default certificate fallback and TCP/UDP streams.
//! 7. Finalization: sentinel endpoints and sorting.

mod endpoints;
pub mod named_port;
mod servers;
mod streams;

use crate::annotations::{
    AnnotationExtractor, ExtractedAnnotations, HealthCheck, IngressClassFilter, ParseContext,
    SecureUpstream,
};
use crate::cluster::ClusterClient;
use crate::config::ControllerConfig;
use crate::constants::DEFAULT_BACKEND_NAME;
use crate::defaults::BackendDefaults;
use crate::model::{sort_locations, Backend, Configuration, Endpoint};
use crate::ssl::CertificateTracker;
use crate::store::{make_key, object_key, ObjectCache};
use endpoints::{service_ports, EndpointResolver, PROTOCOL_TCP, PROTOCOL_UDP};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend, IngressRule, IngressSpec};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Static inputs of the Builder.
#[derive(Clone, Debug)]
pub struct BuilderSettings {
    /// Service (`namespace/name`) behind the default Backend
    pub default_backend_service: String,
    pub class_filter: IngressClassFilter,
    pub sentinel_address: String,
    pub sentinel_port: String,
    /// ConfigMap (`namespace/name`) declaring TCP streams
    pub tcp_services_configmap: Option<String>,
    /// ConfigMap (`namespace/name`) declaring UDP streams
    pub udp_services_configmap: Option<String>,
    pub auth_dir: PathBuf,
}

impl BuilderSettings {
    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        let (sentinel_address, sentinel_port) = config.sentinel();
        Self {
            default_backend_service: config.default_backend_service.clone(),
            class_filter: config.class_filter(),
            sentinel_address,
            sentinel_port,
            tcp_services_configmap: config.tcp_services_configmap.clone(),
            udp_services_configmap: config.udp_services_configmap.clone(),
            auth_dir: config.auth_directory.clone(),
        }
    }
}

/// Service reference of a path or per-rule default backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BackendRef {
    pub service: String,
    /// Port number, or port name when no number is given
    pub port: String,
}

impl BackendRef {
    pub(crate) fn from_backend(backend: &IngressBackend) -> Option<Self> {
        let service = backend.service.as_ref()?;
        let port = service.port.as_ref().and_then(|p| match (p.number, p.name.as_deref()) {
            (Some(number), _) if number > 0 => Some(number.to_string()),
            (_, Some(name)) if !name.is_empty() => Some(name.to_string()),
            _ => None,
        })?;
        Some(Self {
            service: service.name.clone(),
            port,
        })
    }

    pub(crate) fn backend_name(&self, namespace: &str) -> String {
        Backend::name_for(namespace, &self.service, &self.port)
    }

    pub(crate) fn service_key(&self, namespace: &str) -> String {
        make_key(namespace, &self.service)
    }
}

/// A managed rule together with everything extracted from its annotations.
pub(crate) struct RuleView {
    pub ingress: Arc<Ingress>,
    pub annotations: ExtractedAnnotations,
    pub secure: SecureUpstream,
    pub health: HealthCheck,
    pub ssl_passthrough: bool,
    pub service_upstream: bool,
}

impl RuleView {
    fn new(ingress: Arc<Ingress>, extractor: &AnnotationExtractor<'_>) -> Self {
        Self {
            annotations: extractor.extract(&ingress),
            secure: extractor.secure_upstream(&ingress),
            health: extractor.health_check(&ingress),
            ssl_passthrough: extractor.ssl_passthrough(&ingress),
            service_upstream: extractor.service_upstream(&ingress),
            ingress,
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        self.ingress.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub(crate) fn key(&self) -> String {
        object_key(self.ingress.as_ref())
    }

    pub(crate) fn spec(&self) -> Option<&IngressSpec> {
        self.ingress.spec.as_ref()
    }

    pub(crate) fn rules(&self) -> impl Iterator<Item = &IngressRule> {
        self.spec().and_then(|spec| spec.rules.as_ref()).into_iter().flatten()
    }

    pub(crate) fn default_backend(&self) -> Option<BackendRef> {
        self.spec()
            .and_then(|spec| spec.default_backend.as_ref())
            .and_then(BackendRef::from_backend)
    }

    fn path_backends(&self) -> impl Iterator<Item = BackendRef> + '_ {
        self.rules()
            .filter_map(|rule| rule.http.as_ref())
            .flat_map(|http| http.paths.iter())
            .filter_map(|path| BackendRef::from_backend(&path.backend))
    }
}

/// Returns the managed rules in build order.
#[must_use]
pub fn managed_rules(ingresses: &[Arc<Ingress>], class_filter: &IngressClassFilter) -> Vec<Arc<Ingress>> {
    let mut rules: Vec<Arc<Ingress>> = ingresses
        .iter()
        .filter(|ing| class_filter.is_managed(ing))
        .cloned()
        .collect();
    rules.sort_by(|a, b| {
        let created = |ing: &Ingress| ing.metadata.creation_timestamp.as_ref().map(|t| t.0);
        created(a.as_ref())
            .cmp(&created(b.as_ref()))
            .then_with(|| a.metadata.namespace.cmp(&b.metadata.namespace))
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    });
    rules
}

pub struct Builder {
    services: Arc<dyn ObjectCache<Service>>,
    endpoints: Arc<dyn ObjectCache<Endpoints>>,
    secrets: Arc<dyn ObjectCache<Secret>>,
    configmaps: Arc<dyn ObjectCache<ConfigMap>>,
    tracker: Arc<CertificateTracker>,
    cluster: Arc<dyn ClusterClient>,
    settings: BuilderSettings,
}

impl Builder {
    #[must_use]
    pub fn new(
        services: Arc<dyn ObjectCache<Service>>,
        endpoints: Arc<dyn ObjectCache<Endpoints>>,
        secrets: Arc<dyn ObjectCache<Secret>>,
        configmaps: Arc<dyn ObjectCache<ConfigMap>>,
        tracker: Arc<CertificateTracker>,
        cluster: Arc<dyn ClusterClient>,
        settings: BuilderSettings,
    ) -> Self {
        Self {
            services,
            endpoints,
            secrets,
            configmaps,
            tracker,
            cluster,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &BuilderSettings {
        &self.settings
    }

    /// Returns true once every cache the Builder reads has completed its initial sync.
    #[must_use]
    pub fn caches_synced(&self) -> bool {
        self.services.has_synced()
            && self.endpoints.has_synced()
            && self.secrets.has_synced()
            && self.configmaps.has_synced()
    }

    /// Builds a complete snapshot from `ingresses`.
    pub async fn build(&self, ingresses: &[Arc<Ingress>], defaults: &BackendDefaults) -> Configuration {
        let start = Instant::now();
        let extractor = AnnotationExtractor::new(ParseContext {
            defaults,
            secrets: self.secrets.as_ref(),
            certificates: self.tracker.as_ref(),
            auth_dir: &self.settings.auth_dir,
        });
        let rules: Vec<RuleView> = managed_rules(ingresses, &self.settings.class_filter)
            .into_iter()
            .map(|ing| RuleView::new(ing, &extractor))
            .collect();

        let mut resolver = EndpointResolver::new(
            self.services.as_ref(),
            self.endpoints.as_ref(),
            self.cluster.as_ref(),
        );

        let default_backend = self.default_backend(&mut resolver).await;
        let mut backends = BTreeMap::from([(default_backend.name.clone(), default_backend.clone())]);
        create_backends(&mut resolver, &rules, &mut backends).await;

        let mut server_map = servers::create_servers(&rules, &default_backend, defaults, &self.tracker);
        servers::add_locations(&mut server_map, &rules);
        let mut passthrough = servers::passthrough_backends(&server_map, &mut backends);
        servers::apply_default_certificate(&mut server_map, &self.tracker);

        let tcp_endpoints = streams::build_streams(
            &mut resolver,
            self.configmaps.as_ref(),
            self.settings.tcp_services_configmap.as_deref(),
            PROTOCOL_TCP,
        )
        .await;
        let udp_endpoints = streams::build_streams(
            &mut resolver,
            self.configmaps.as_ref(),
            self.settings.udp_services_configmap.as_deref(),
            PROTOCOL_UDP,
        )
        .await;

        let backends: Vec<Backend> = backends
            .into_values()
            .map(|mut backend| {
                if backend.endpoints.is_empty() {
                    debug!(backend = %backend.name, "Backend has no endpoints, using sentinel");
                    backend.endpoints.push(self.sentinel());
                } else {
                    backend.endpoints.sort();
                }
                backend
            })
            .collect();
        let servers: Vec<_> = server_map
            .into_values()
            .map(|mut server| {
                sort_locations(&mut server.locations);
                server
            })
            .collect();
        passthrough.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        info!(
            rules = rules.len(),
            backends = backends.len(),
            servers = servers.len(),
            tcp = tcp_endpoints.len(),
            udp = udp_endpoints.len(),
            duration_ms = start.elapsed().as_millis(),
            "Configuration built"
        );

        Configuration {
            backends,
            servers,
            tcp_endpoints,
            udp_endpoints,
            passthrough_backends: passthrough,
        }
    }

    fn sentinel(&self) -> Endpoint {
        Endpoint {
            address: self.settings.sentinel_address.clone(),
            port: self.settings.sentinel_port.clone(),
            max_fails: 0,
            fail_timeout: 0,
        }
    }

    /// Backend of the configured fallback service, using its first port.
    async fn default_backend(&self, resolver: &mut EndpointResolver<'_>) -> Backend {
        let key = &self.settings.default_backend_service;
        let mut backend = Backend {
            name: DEFAULT_BACKEND_NAME.to_string(),
            service: Some(key.clone()),
            ..Default::default()
        };

        let svc = match resolver.service(key) {
            Ok(svc) => svc,
            Err(e) => {
                warn!(error = %e, "Default backend service unavailable, using sentinel");
                return backend;
            }
        };
        let Some(port) = service_ports(&svc).next().cloned() else {
            warn!(service = %key, "Default backend service exposes no ports, using sentinel");
            return backend;
        };
        backend.port = port.port.to_string();

        match resolver
            .endpoints_for_port(&svc, &port, PROTOCOL_TCP, &HealthCheck::default())
            .await
        {
            Ok(endpoints) if !endpoints.is_empty() => backend.endpoints = endpoints,
            Ok(_) => warn!(service = %key, "Default backend service has no active endpoints"),
            Err(e) => warn!(service = %key, error = %e, "Failed to resolve default backend endpoints"),
        }
        backend
    }
}

/// Creates a Backend for every unseen service port referenced by a rule.
///
/// The first rule referencing a service port decides its secure and CA settings.
async fn create_backends(
    resolver: &mut EndpointResolver<'_>,
    rules: &[RuleView],
    backends: &mut BTreeMap<String, Backend>,
) {
    for rule in rules {
        let namespace = rule.namespace();
        let references: Vec<BackendRef> = rule
            .default_backend()
            .into_iter()
            .chain(rule.path_backends())
            .collect();

        for reference in references {
            let name = reference.backend_name(namespace);
            if backends.contains_key(&name) {
                continue;
            }

            let svc_key = reference.service_key(namespace);
            let mut backend = Backend {
                name: name.clone(),
                service: Some(svc_key.clone()),
                port: reference.port.clone(),
                secure: rule.secure.secure,
                secure_ca_cert: rule.secure.ca_cert.clone(),
                ..Default::default()
            };

            let resolved = if rule.service_upstream {
                resolver
                    .cluster_endpoint(&svc_key, &reference.port, &rule.health)
                    .map(|endpoint| vec![endpoint])
            } else {
                resolver
                    .service_endpoints(&svc_key, &reference.port, &rule.health)
                    .await
            };
            match resolved {
                Ok(endpoints) => {
                    debug!(backend = %name, endpoints = endpoints.len(), "Backend resolved");
                    backend.endpoints = endpoints;
                }
                Err(e) => warn!(
                    backend = %name,
                    ingress = %rule.key(),
                    error = %e,
                    "Failed to resolve backend endpoints, using sentinel"
                ),
            }
            backends.insert(name, backend);
        }
    }
}
