// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Normalized configuration model handed to backend adapters.
//!
//! Every type in this module except [`CertificateRecord`] is rebuilt from scratch on
//! each reconciliation pass. Equality on [`Configuration`] is set-based: two snapshots
//! holding the same Backends, Servers and streams compare equal regardless of order,
//! which is what the Sync Engine uses to decide whether a reload is warranted.

use crate::annotations::{
    BasicDigest, CertificateAuth, ExternalAuth, ProxyConfig, RateLimit, Redirect, Rewrite,
    SourceRange,
};
use crate::constants::ROOT_LOCATION;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One network endpoint of a Backend.
///
/// Field order matters: the derived ordering sorts by address, then port.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// IP address or DNS name
    pub address: String,
    /// Port, kept as a string so named and numeric ports share one shape
    pub port: String,
    /// Failed attempts before the endpoint is considered unavailable (0 disables)
    pub max_fails: u32,
    /// Window in seconds for `max_fails`
    pub fail_timeout: u32,
}

impl Endpoint {
    /// `address:port` identity used for deduplication.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// CA material used to verify a secure upstream.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureCaCert {
    pub secret: String,
    pub ca_file_name: String,
    pub pem_sha: String,
}

/// Named pool of endpoints implementing one service port.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// `{namespace}-{service}-{port}`, unique per snapshot
    pub name: String,
    /// Service key (`namespace/name`), `None` for the default backend without a service
    pub service: Option<String>,
    /// Service port as written in the rule
    pub port: String,
    /// Upstream expects TLS
    pub secure: bool,
    /// CA used to verify TLS upstreams
    pub secure_ca_cert: Option<SecureCaCert>,
    /// Backend is the target of an SSL passthrough Server
    pub ssl_passthrough: bool,
    /// Sorted by (address, port); never empty once finalized
    pub endpoints: Vec<Endpoint>,
}

impl Backend {
    /// Builds the canonical Backend name for a service port.
    #[must_use]
    pub fn name_for(namespace: &str, service: &str, port: &str) -> String {
        format!("{namespace}-{service}-{port}")
    }
}

impl PartialEq for Backend {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.service == other.service
            && self.port == other.port
            && self.secure == other.secure
            && self.secure_ca_cert == other.secure_ca_cert
            && self.ssl_passthrough == other.ssl_passthrough
            && unordered_eq(&self.endpoints, &other.endpoints)
    }
}

/// Path-scoped routing unit within a Server.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub path: String,
    /// Target Backend name
    pub backend: String,
    /// Service key (`namespace/name`) behind the Backend
    pub service: Option<String>,
    pub port: String,
    /// Location still points at the default Backend and may be replaced
    pub is_default_backend: bool,
    pub basic_digest_auth: Option<BasicDigest>,
    pub external_auth: Option<ExternalAuth>,
    pub certificate_auth: Option<CertificateAuth>,
    pub enable_cors: bool,
    pub whitelist: SourceRange,
    pub proxy: ProxyConfig,
    pub rate_limit: RateLimit,
    pub redirect: Option<Redirect>,
    pub rewrite: Rewrite,
    pub use_port_in_redirects: bool,
    pub configuration_snippet: String,
    /// Reason the rule was denied; the adapter must refuse traffic when set
    pub denied: Option<String>,
}

/// Virtual host.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub hostname: String,
    pub ssl_passthrough: bool,
    /// Path of the PEM bundle serving this host
    pub ssl_certificate: String,
    /// Fingerprint of the PEM bundle
    pub ssl_pem_checksum: String,
    /// Certificate expiry (unix seconds)
    pub ssl_expire_time: Option<i64>,
    /// Sorted by path descending, root last
    pub locations: Vec<Location>,
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname
            && self.ssl_passthrough == other.ssl_passthrough
            && self.ssl_certificate == other.ssl_certificate
            && self.ssl_pem_checksum == other.ssl_pem_checksum
            && self.ssl_expire_time == other.ssl_expire_time
            && unordered_eq(&self.locations, &other.locations)
    }
}

/// Service reference of a TCP/UDP stream.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamBackend {
    pub namespace: String,
    pub name: String,
    pub port: String,
}

/// One exposed TCP or UDP port.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamService {
    /// Port exposed by the proxy
    pub port: u16,
    pub backend: StreamBackend,
    pub endpoints: Vec<Endpoint>,
    /// Forward the PROXY protocol header (TCP only)
    pub use_proxy_protocol: bool,
}

impl PartialEq for StreamService {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port
            && self.backend == other.backend
            && self.use_proxy_protocol == other.use_proxy_protocol
            && unordered_eq(&self.endpoints, &other.endpoints)
    }
}

/// SSL passthrough route: TLS for `hostname` is forwarded untouched to `backend`.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslPassthroughBackend {
    pub backend: String,
    pub service: Option<String>,
    pub port: String,
    pub hostname: String,
}

/// Complete snapshot produced by one reconciliation pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub backends: Vec<Backend>,
    pub servers: Vec<Server>,
    pub tcp_endpoints: Vec<StreamService>,
    pub udp_endpoints: Vec<StreamService>,
    pub passthrough_backends: Vec<SslPassthroughBackend>,
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        unordered_eq(&self.backends, &other.backends)
            && unordered_eq(&self.servers, &other.servers)
            && unordered_eq(&self.tcp_endpoints, &other.tcp_endpoints)
            && unordered_eq(&self.udp_endpoints, &other.udp_endpoints)
            && unordered_eq(&self.passthrough_backends, &other.passthrough_backends)
    }
}

impl Configuration {
    /// Looks up a Backend by name.
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Looks up a Server by hostname.
    #[must_use]
    pub fn server(&self, hostname: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.hostname == hostname)
    }
}

/// TLS material loaded from a secret and persisted to disk.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub namespace: String,
    pub name: String,
    /// CA bundle path, set for client-auth anchors and verified keypairs
    pub ca_file_name: Option<String>,
    /// Path of the PEM bundle (cert, key and optional CA)
    pub pem_file_name: String,
    /// Hex SHA-256 of the persisted bundle
    pub pem_sha: String,
    /// Subject common name followed by DNS alt-names
    pub cn: Vec<String>,
    /// Leaf expiry (unix seconds)
    pub expire_time: Option<i64>,
}

impl CertificateRecord {
    /// Returns true if the certificate names cover `host`.
    ///
    /// A name matches exactly (case-insensitive) or as a left-most wildcard
    /// (`*.example.com` covers `www.example.com` but not `a.b.example.com`).
    #[must_use]
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.cn.iter().any(|name| {
            let name = name.to_ascii_lowercase();
            if name == host {
                return true;
            }
            match (name.strip_prefix("*."), host.split_once('.')) {
                (Some(suffix), Some((label, rest))) => !label.is_empty() && rest == suffix,
                _ => false,
            }
        })
    }

    /// Returns true if this record only holds a client-auth CA.
    #[must_use]
    pub fn is_ca_only(&self) -> bool {
        self.ca_file_name.as_deref() == Some(self.pem_file_name.as_str())
    }
}

/// Sorts Locations by path descending with the root path always last.
pub fn sort_locations(locations: &mut [Location]) {
    locations.sort_by(|a, b| match (a.path == ROOT_LOCATION, b.path == ROOT_LOCATION) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => b.path.cmp(&a.path),
    });
}

/// Order-insensitive comparison of two slices.
fn unordered_eq<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x)) && b.iter().all(|y| a.contains(y))
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod model_tests;
