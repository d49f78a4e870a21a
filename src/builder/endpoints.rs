// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Service → Endpoint resolution for a single build pass.

use super::named_port;
use crate::annotations::HealthCheck;
use crate::cluster::ClusterClient;
use crate::errors::ResolveError;
use crate::model::Endpoint;
use crate::store::{object_key, ObjectCache};
use k8s_openapi::api::core::v1::{Endpoints, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

pub(crate) const PROTOCOL_TCP: &str = "TCP";
pub(crate) const PROTOCOL_UDP: &str = "UDP";

const SERVICE_TYPE_EXTERNAL_NAME: &str = "ExternalName";

/// Resolves endpoints from the caches, refreshing named ports at most once per
/// Service per pass.
pub(crate) struct EndpointResolver<'a> {
    services: &'a dyn ObjectCache<Service>,
    endpoints: &'a dyn ObjectCache<Endpoints>,
    cluster: &'a dyn ClusterClient,
    refreshed: HashMap<String, BTreeMap<String, String>>,
}

impl<'a> EndpointResolver<'a> {
    pub(crate) fn new(
        services: &'a dyn ObjectCache<Service>,
        endpoints: &'a dyn ObjectCache<Endpoints>,
        cluster: &'a dyn ClusterClient,
    ) -> Self {
        Self {
            services,
            endpoints,
            cluster,
            refreshed: HashMap::new(),
        }
    }

    pub(crate) fn service(&self, key: &str) -> Result<std::sync::Arc<Service>, ResolveError> {
        self.services
            .get_by_key(key)
            .ok_or_else(|| ResolveError::ServiceNotFound {
                key: key.to_string(),
            })
    }

    /// Endpoints of the Service port referenced as `port` (number, target port or name).
    pub(crate) async fn service_endpoints(
        &mut self,
        svc_key: &str,
        port: &str,
        health: &HealthCheck,
    ) -> Result<Vec<Endpoint>, ResolveError> {
        let svc = self.service(svc_key)?;
        let service_port = service_ports(&svc)
            .find(|sp| {
                sp.port.to_string() == port
                    || sp.target_port.as_ref().is_some_and(|tp| int_or_string(tp) == port)
                    || sp.name.as_deref() == Some(port)
            })
            .cloned()
            .ok_or_else(|| ResolveError::PortNotFound {
                key: svc_key.to_string(),
                port: port.to_string(),
            })?;

        let endpoints = self
            .endpoints_for_port(&svc, &service_port, PROTOCOL_TCP, health)
            .await?;
        if endpoints.is_empty() {
            return Err(ResolveError::NoEndpoints {
                key: svc_key.to_string(),
            });
        }
        Ok(endpoints)
    }

    /// The Service ClusterIP as a single endpoint. A named `port` resolves to the
    /// Service port carrying that name.
    pub(crate) fn cluster_endpoint(
        &self,
        svc_key: &str,
        port: &str,
        health: &HealthCheck,
    ) -> Result<Endpoint, ResolveError> {
        let svc = self.service(svc_key)?;
        let port = service_ports(&svc)
            .find(|sp| sp.name.as_deref() == Some(port))
            .map(|sp| sp.port)
            .or_else(|| port.parse::<i32>().ok())
            .ok_or_else(|| ResolveError::PortNotFound {
                key: svc_key.to_string(),
                port: port.to_string(),
            })?;
        let cluster_ip = svc
            .spec
            .as_ref()
            .and_then(|spec| spec.cluster_ip.as_deref())
            .filter(|ip| !ip.is_empty() && *ip != "None")
            .ok_or_else(|| ResolveError::NoEndpoints {
                key: svc_key.to_string(),
            })?;
        Ok(Endpoint {
            address: cluster_ip.to_string(),
            port: port.to_string(),
            max_fails: health.max_fails,
            fail_timeout: health.fail_timeout,
        })
    }

    /// Ready endpoints of one Service port for `protocol`, deduplicated by
    /// `address:port` and sorted.
    pub(crate) async fn endpoints_for_port(
        &mut self,
        svc: &Service,
        service_port: &ServicePort,
        protocol: &str,
        health: &HealthCheck,
    ) -> Result<Vec<Endpoint>, ResolveError> {
        let key = object_key(svc);
        let spec = svc.spec.as_ref();

        if spec.and_then(|s| s.type_.as_deref()) == Some(SERVICE_TYPE_EXTERNAL_NAME) {
            let target = match &service_port.target_port {
                Some(IntOrString::Int(port)) => *port,
                Some(IntOrString::String(port)) => port.parse().unwrap_or(0),
                None => service_port.port,
            };
            let external_name = spec
                .and_then(|s| s.external_name.as_deref())
                .unwrap_or_default();
            if target <= 0 || external_name.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![Endpoint {
                address: external_name.to_string(),
                port: target.to_string(),
                max_fails: health.max_fails,
                fail_timeout: health.fail_timeout,
            }]);
        }

        let port_name = service_port.name.as_deref().filter(|n| !n.is_empty());
        let named_target = match (&service_port.target_port, port_name) {
            (Some(IntOrString::String(name)), None) if name.parse::<i32>().is_err() => {
                Some(self.resolve_named_port(svc, name).await?)
            }
            _ => None,
        };

        let Some(endpoints) = self.endpoints.get_by_key(&key) else {
            debug!(service = %key, "No endpoints object for service");
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for subset in endpoints.subsets.iter().flatten() {
            for ep_port in subset.ports.iter().flatten() {
                if ep_port.protocol.as_deref().unwrap_or(PROTOCOL_TCP) != protocol {
                    continue;
                }
                let target = match (port_name, named_target) {
                    (Some(name), _) if ep_port.name.as_deref() == Some(name) => ep_port.port,
                    (Some(_), _) => continue,
                    (None, Some(number)) if ep_port.port == number => ep_port.port,
                    (None, Some(_)) => continue,
                    (None, None) => ep_port.port,
                };
                if target <= 0 {
                    continue;
                }
                for address in subset.addresses.iter().flatten() {
                    let endpoint = Endpoint {
                        address: address.ip.clone(),
                        port: target.to_string(),
                        max_fails: health.max_fails,
                        fail_timeout: health.fail_timeout,
                    };
                    if seen.insert(endpoint.key()) {
                        result.push(endpoint);
                    }
                }
            }
        }

        result.sort();
        Ok(result)
    }

    async fn resolve_named_port(&mut self, svc: &Service, name: &str) -> Result<i32, ResolveError> {
        let key = object_key(svc);
        let lookup = |ports: &BTreeMap<String, String>| {
            ports.get(name).and_then(|p| p.parse::<i32>().ok())
        };

        if let Some(port) = lookup(&named_port::annotated_ports(svc)) {
            return Ok(port);
        }
        if !self.refreshed.contains_key(&key) {
            debug!(service = %key, port = %name, "Named port not cached, refreshing from pods");
            let ports = named_port::refresh(self.cluster, svc).await;
            self.refreshed.insert(key.clone(), ports);
        }
        self.refreshed
            .get(&key)
            .and_then(lookup)
            .ok_or(ResolveError::NamedPortUnresolved {
                key,
                port: name.to_string(),
            })
    }
}

pub(crate) fn service_ports(svc: &Service) -> impl Iterator<Item = &ServicePort> {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten()
}

fn int_or_string(value: &IntOrString) -> String {
    match value {
        IntOrString::Int(i) => i.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}
