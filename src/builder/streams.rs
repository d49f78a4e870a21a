// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! TCP/UDP stream services declared in ConfigMaps.
//!
//! Each data entry maps an exposed port to `namespace/service:port[:PROXY]`.

use super::endpoints::{service_ports, EndpointResolver, PROTOCOL_TCP};
use crate::annotations::HealthCheck;
use crate::constants::RESERVED_STREAM_PORTS;
use crate::model::{StreamBackend, StreamService};
use crate::store::{split_key, ObjectCache};
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, warn};

const PROXY_PROTOCOL_FLAG: &str = "PROXY";

/// Parsed right-hand side of a stream entry.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct StreamTarget<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub port: &'a str,
    pub proxy_protocol: bool,
}

/// Parses `namespace/service:port[:PROXY]`.
pub(crate) fn parse_target(value: &str) -> Option<StreamTarget<'_>> {
    let mut parts = value.trim().split(':');
    let service = parts.next()?;
    let port = parts.next().filter(|p| !p.is_empty())?;
    let proxy_protocol = parts.next() == Some(PROXY_PROTOCOL_FLAG);

    let (Some(namespace), name) = split_key(service) else {
        return None;
    };
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some(StreamTarget {
        namespace,
        name,
        port,
        proxy_protocol,
    })
}

/// Builds the stream services of one protocol from the ConfigMap at `configmap_key`.
pub(crate) async fn build_streams(
    resolver: &mut EndpointResolver<'_>,
    configmaps: &dyn ObjectCache<ConfigMap>,
    configmap_key: Option<&str>,
    protocol: &str,
) -> Vec<StreamService> {
    let Some(configmap_key) = configmap_key else {
        return Vec::new();
    };
    let Some(configmap) = configmaps.get_by_key(configmap_key) else {
        debug!(configmap = %configmap_key, protocol = protocol, "Stream services ConfigMap not found");
        return Vec::new();
    };

    let mut streams = Vec::new();
    for (exposed, value) in configmap.data.iter().flatten() {
        let Ok(port) = exposed.trim().parse::<u16>() else {
            warn!(port = %exposed, protocol = protocol, "Stream port is not a valid number, skipping");
            continue;
        };
        if RESERVED_STREAM_PORTS.contains(&port) {
            warn!(port = port, protocol = protocol, "Stream port is reserved by the proxy, skipping");
            continue;
        }
        let Some(target) = parse_target(value) else {
            warn!(port = port, value = %value, protocol = protocol, "Invalid stream service reference, skipping");
            continue;
        };

        let svc_key = format!("{}/{}", target.namespace, target.name);
        let svc = match resolver.service(&svc_key) {
            Ok(svc) => svc,
            Err(e) => {
                warn!(port = port, error = %e, protocol = protocol, "Skipping stream service");
                continue;
            }
        };

        let by_number = target.port.parse::<i32>().ok();
        let service_port = service_ports(&svc)
            .find(|sp| {
                let matches_port = match by_number {
                    Some(number) => sp.port == number,
                    None => sp.name.as_deref() == Some(target.port),
                };
                matches_port && sp.protocol.as_deref().unwrap_or(PROTOCOL_TCP) == protocol
            })
            .cloned();
        let Some(service_port) = service_port else {
            warn!(
                port = port,
                service = %svc_key,
                service_port = %target.port,
                protocol = protocol,
                "Service has no matching port, skipping stream"
            );
            continue;
        };

        let endpoints = match resolver
            .endpoints_for_port(&svc, &service_port, protocol, &HealthCheck::default())
            .await
        {
            Ok(endpoints) if !endpoints.is_empty() => endpoints,
            Ok(_) => {
                warn!(port = port, service = %svc_key, protocol = protocol, "Service has no active endpoints, skipping stream");
                continue;
            }
            Err(e) => {
                warn!(port = port, error = %e, protocol = protocol, "Skipping stream service");
                continue;
            }
        };

        streams.push(StreamService {
            port,
            backend: StreamBackend {
                namespace: target.namespace.to_string(),
                name: target.name.to_string(),
                port: target.port.to_string(),
            },
            endpoints,
            use_proxy_protocol: target.proxy_protocol && protocol == PROTOCOL_TCP,
        });
    }

    streams.sort_by_key(|s| s.port);
    streams
}
