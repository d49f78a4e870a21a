// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Server and Location assembly.

use super::RuleView;
use crate::annotations::ProxyConfig;
use crate::constants::{
    CERT_EXPIRY_WARNING_SECS, DEFAULT_BACKEND_NAME, DEFAULT_CERTIFICATE_KEY, DEFAULT_SERVER_NAME,
    ROOT_LOCATION,
};
use crate::defaults::BackendDefaults;
use crate::model::{Backend, CertificateRecord, Location, Server, SslPassthroughBackend};
use crate::ssl::CertificateTracker;
use chrono::Utc;
use k8s_openapi::api::networking::v1::IngressRule;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Hostname of a rule, the default Server name when empty.
pub(crate) fn host_of(rule: &IngressRule) -> &str {
    rule.host
        .as_deref()
        .filter(|h| !h.is_empty())
        .unwrap_or(DEFAULT_SERVER_NAME)
}

pub(crate) fn default_proxy(d: &BackendDefaults) -> ProxyConfig {
    ProxyConfig {
        body_size: d.proxy_body_size.clone(),
        connect_timeout: d.proxy_connect_timeout,
        send_timeout: d.proxy_send_timeout,
        read_timeout: d.proxy_read_timeout,
        buffer_size: d.proxy_buffer_size.clone(),
        cookie_domain: d.proxy_cookie_domain.clone(),
        cookie_path: d.proxy_cookie_path.clone(),
        next_upstream: d.proxy_next_upstream.clone(),
    }
}

fn catch_all(backend: String, service: Option<String>, port: String, d: &BackendDefaults) -> Location {
    Location {
        path: ROOT_LOCATION.to_string(),
        backend,
        service,
        port,
        is_default_backend: true,
        proxy: default_proxy(d),
        use_port_in_redirects: d.use_port_in_redirects,
        ..Default::default()
    }
}

fn set_certificate(server: &mut Server, record: &CertificateRecord) {
    server.ssl_certificate.clone_from(&record.pem_file_name);
    server.ssl_pem_checksum.clone_from(&record.pem_sha);
    server.ssl_expire_time = record.expire_time;
}

/// Creates one Server per distinct hostname plus the default Server, then binds TLS.
///
/// The first rule naming a host decides its catch-all Location and passthrough flag.
pub(crate) fn create_servers(
    rules: &[RuleView],
    default_backend: &Backend,
    defaults: &BackendDefaults,
    tracker: &CertificateTracker,
) -> BTreeMap<String, Server> {
    let mut servers = BTreeMap::new();

    let mut default_server = Server {
        hostname: DEFAULT_SERVER_NAME.to_string(),
        locations: vec![catch_all(
            default_backend.name.clone(),
            default_backend.service.clone(),
            default_backend.port.clone(),
            defaults,
        )],
        ..Default::default()
    };
    if let Some(record) = tracker.get(DEFAULT_CERTIFICATE_KEY) {
        set_certificate(&mut default_server, &record);
    }
    servers.insert(DEFAULT_SERVER_NAME.to_string(), default_server);

    for rule in rules {
        let namespace = rule.namespace();
        let root = match rule.default_backend() {
            Some(reference) => catch_all(
                reference.backend_name(namespace),
                Some(reference.service_key(namespace)),
                reference.port.clone(),
                defaults,
            ),
            None => catch_all(
                default_backend.name.clone(),
                default_backend.service.clone(),
                default_backend.port.clone(),
                defaults,
            ),
        };

        for host_rule in rule.rules() {
            let host = host_of(host_rule);
            if servers.contains_key(host) {
                continue;
            }
            debug!(host = %host, ingress = %rule.key(), "Creating server");
            servers.insert(
                host.to_string(),
                Server {
                    hostname: host.to_string(),
                    ssl_passthrough: rule.ssl_passthrough,
                    locations: vec![root.clone()],
                    ..Default::default()
                },
            );
        }
    }

    for rule in rules {
        bind_certificates(&mut servers, rule, tracker);
    }

    servers
}

/// Attaches the TLS certificate a rule binds to each of its hosts, first binding wins.
fn bind_certificates(servers: &mut BTreeMap<String, Server>, rule: &RuleView, tracker: &CertificateTracker) {
    let Some(tls) = rule.spec().and_then(|spec| spec.tls.as_ref()).filter(|t| !t.is_empty()) else {
        return;
    };

    for host_rule in rule.rules() {
        let host = host_of(host_rule);
        let Some(server) = servers.get_mut(host) else {
            continue;
        };
        if !server.ssl_certificate.is_empty() {
            continue;
        }

        let Some(binding) = tls
            .iter()
            .find(|t| t.hosts.iter().flatten().any(|h| h == host))
        else {
            debug!(host = %host, ingress = %rule.key(), "No TLS section names the host");
            continue;
        };

        let secret_name = binding.secret_name.as_deref().unwrap_or_default();
        if secret_name.is_empty() {
            if let Some(record) = tracker.get(DEFAULT_CERTIFICATE_KEY) {
                debug!(host = %host, "TLS section has no secret, using the default certificate");
                set_certificate(server, &record);
            }
            continue;
        }

        let key = format!("{}/{}", rule.namespace(), secret_name);
        let Some(record) = tracker.get(&key) else {
            info!(host = %host, secret = %key, "SSL certificate is not loaded yet");
            continue;
        };
        if !record.matches_host(host) {
            warn!(
                host = %host,
                secret = %key,
                names = ?record.cn,
                "SSL certificate does not cover the host"
            );
            continue;
        }

        set_certificate(server, &record);
        if let Some(expire) = record.expire_time {
            if expire - Utc::now().timestamp() < CERT_EXPIRY_WARNING_SECS {
                warn!(host = %host, secret = %key, expire_time = expire, "SSL certificate is about to expire");
            }
        }
    }
}

/// Adds the path Locations of every rule.
///
/// A Location still on the default Backend is taken over by the first rule reaching
/// its path; any other existing Location keeps its first assignment.
pub(crate) fn add_locations(servers: &mut BTreeMap<String, Server>, rules: &[RuleView]) {
    for rule in rules {
        let namespace = rule.namespace();
        for host_rule in rule.rules() {
            let host = host_of(host_rule);
            let Some(http) = host_rule.http.as_ref() else {
                if host != DEFAULT_SERVER_NAME {
                    debug!(host = %host, ingress = %rule.key(), "Rule has no HTTP paths, using default backend");
                }
                continue;
            };
            let Some(server) = servers.get_mut(host) else {
                continue;
            };

            for path in &http.paths {
                let Some(reference) = super::BackendRef::from_backend(&path.backend) else {
                    debug!(ingress = %rule.key(), "Path does not reference a service, skipping");
                    continue;
                };
                let path_str = path
                    .path
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .unwrap_or(ROOT_LOCATION);
                let backend_name = reference.backend_name(namespace);

                if let Some(existing) = server.locations.iter_mut().find(|l| l.path == path_str) {
                    if !existing.is_default_backend {
                        debug!(
                            host = %host,
                            path = %path_str,
                            backend = %existing.backend,
                            ignored = %backend_name,
                            ingress = %rule.key(),
                            "Location already configured, keeping the first assignment"
                        );
                        continue;
                    }
                    debug!(host = %host, path = %path_str, backend = %backend_name, "Replacing default backend of location");
                    existing.backend = backend_name;
                    existing.service = Some(reference.service_key(namespace));
                    existing.port.clone_from(&reference.port);
                    existing.is_default_backend = false;
                    rule.annotations.apply_to(existing);
                    continue;
                }

                debug!(host = %host, path = %path_str, backend = %backend_name, "Adding location");
                let mut location = Location {
                    path: path_str.to_string(),
                    backend: backend_name,
                    service: Some(reference.service_key(namespace)),
                    port: reference.port.clone(),
                    ..Default::default()
                };
                rule.annotations.apply_to(&mut location);
                server.locations.push(location);
            }
        }
    }
}

/// Collects passthrough descriptors and flags the Backends they target.
pub(crate) fn passthrough_backends(
    servers: &BTreeMap<String, Server>,
    backends: &mut BTreeMap<String, Backend>,
) -> Vec<SslPassthroughBackend> {
    let mut descriptors = Vec::new();
    for server in servers.values().filter(|s| s.ssl_passthrough) {
        for location in &server.locations {
            if location.path != ROOT_LOCATION {
                warn!(host = %server.hostname, path = %location.path, "Ignoring non-root path of SSL passthrough host");
                continue;
            }
            if location.backend == DEFAULT_BACKEND_NAME {
                warn!(host = %server.hostname, "SSL passthrough host points at the default backend, ignoring");
                continue;
            }
            if let Some(backend) = backends.get_mut(&location.backend) {
                backend.ssl_passthrough = true;
            }
            descriptors.push(SslPassthroughBackend {
                backend: location.backend.clone(),
                service: location.service.clone(),
                port: location.port.clone(),
                hostname: server.hostname.clone(),
            });
        }
    }
    descriptors
}

/// Gives every Server without a bound certificate the default one.
pub(crate) fn apply_default_certificate(servers: &mut BTreeMap<String, Server>, tracker: &CertificateTracker) {
    let Some(record) = tracker.get(DEFAULT_CERTIFICATE_KEY) else {
        warn!("Default certificate is not loaded, servers without TLS binding have no certificate");
        return;
    };
    for server in servers.values_mut() {
        if server.ssl_certificate.is_empty() {
            set_certificate(server, &record);
        }
    }
}
