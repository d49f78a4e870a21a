// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Named `targetPort` resolution.
//!
//! A Service whose `targetPort` is a name carries the resolved numbers in the
//! `ingress.kubernetes.io/named-ports` annotation (a JSON object of name → port).
//! When the annotation misses a name, the mapping is rebuilt once from the first
//! pod behind the Service and written back to the annotation.

use crate::cluster::{selector_string, ClusterClient};
use crate::labels::NAMED_PORT_ANNOTATION;
use crate::store::object_key;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Reads the named-port mapping stored on a Service.
#[must_use]
pub fn annotated_ports(svc: &Service) -> BTreeMap<String, String> {
    svc.metadata
        .annotations
        .as_ref()
        .and_then(|anns| anns.get(NAMED_PORT_ANNOTATION))
        .and_then(|raw| match serde_json::from_str(raw) {
            Ok(ports) => Some(ports),
            Err(e) => {
                warn!(service = %object_key(svc), error = %e, "Ignoring malformed named-port annotation");
                None
            }
        })
        .unwrap_or_default()
}

/// Finds the container port of `pod` carrying `name`.
#[must_use]
pub fn find_container_port(pod: &Pod, name: &str) -> Option<i32> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .find(|p| p.name.as_deref() == Some(name))
        .map(|p| p.container_port)
}

/// Builds the name → port mapping for every named `targetPort` of `svc` from `pod`.
#[must_use]
pub fn named_ports_from_pod(svc: &Service, pod: &Pod) -> BTreeMap<String, String> {
    let mut ports = BTreeMap::new();
    let service_ports = svc
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten();
    for sp in service_ports {
        let Some(IntOrString::String(name)) = &sp.target_port else {
            continue;
        };
        if name.is_empty() || name.parse::<i32>().is_ok() {
            continue;
        }
        match find_container_port(pod, name) {
            Some(port) => {
                ports.insert(name.clone(), port.to_string());
            }
            None => debug!(
                service = %object_key(svc),
                port = %name,
                "Pod does not expose named port"
            ),
        }
    }
    ports
}

/// Rebuilds the named-port mapping of `svc` from a live pod.
///
/// The annotation is updated when the mapping differs from the stored one. Returns
/// an empty map when the Service has no selector or no pods.
pub async fn refresh(cluster: &dyn ClusterClient, svc: &Service) -> BTreeMap<String, String> {
    let key = object_key(svc);
    let namespace = svc.metadata.namespace.as_deref().unwrap_or_default();
    let name = svc.metadata.name.as_deref().unwrap_or_default();

    let Some(selector) = svc
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .filter(|sel| !sel.is_empty())
    else {
        debug!(service = %key, "Service has no selector, cannot resolve named ports");
        return BTreeMap::new();
    };

    let pods = match cluster.list_pods(namespace, &selector_string(selector)).await {
        Ok(pods) => pods,
        Err(e) => {
            warn!(service = %key, error = %e, "Failed to list pods for named port resolution");
            return BTreeMap::new();
        }
    };
    let Some(pod) = pods.first() else {
        debug!(service = %key, "Service has no pods, cannot resolve named ports");
        return BTreeMap::new();
    };

    let ports = named_ports_from_pod(svc, pod);
    if !ports.is_empty() && ports != annotated_ports(svc) {
        match serde_json::to_string(&ports) {
            Ok(data) => {
                info!(service = %key, "Updating named port mappings");
                let annotations = BTreeMap::from([(NAMED_PORT_ANNOTATION.to_string(), data)]);
                if let Err(e) = cluster
                    .update_service_annotations(namespace, name, annotations)
                    .await
                {
                    warn!(service = %key, error = %e, "Failed to store named port mappings");
                }
            }
            Err(e) => warn!(service = %key, error = %e, "Failed to encode named port mappings"),
        }
    }
    ports
}
