// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller configuration from command-line flags and environment.

use crate::annotations::IngressClassFilter;
use crate::constants::{
    DEFAULT_AUTH_DIRECTORY, DEFAULT_CONFIG_OUTPUT, DEFAULT_ELECTION_ID, DEFAULT_HEALTH_PORT,
    DEFAULT_INGRESS_CLASS, DEFAULT_SENTINEL_ENDPOINT, DEFAULT_SSL_DIRECTORY,
    DEFAULT_STATUS_UPDATE_INTERVAL_SECS, DEFAULT_SYNC_PERIOD_SECS,
};
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Kubernetes ingress controller
#[derive(Parser, Debug, Clone)]
#[command(name = "ingress-controller", version, about, long_about = None)]
pub struct ControllerConfig {
    /// Service (`namespace/name`) receiving requests that match no rule
    #[arg(long, env = "DEFAULT_BACKEND_SERVICE")]
    pub default_backend_service: String,

    /// Ingress class handled by this controller
    #[arg(long, env = "INGRESS_CLASS")]
    pub ingress_class: Option<String>,

    /// Class assumed for rules that do not name one
    #[arg(long, env = "DEFAULT_INGRESS_CLASS", default_value = DEFAULT_INGRESS_CLASS)]
    pub default_ingress_class: String,

    /// ConfigMap (`namespace/name`) holding controller-wide overrides
    #[arg(long, env = "CONFIGMAP")]
    pub configmap: Option<String>,

    /// ConfigMap (`namespace/name`) exposing TCP services
    #[arg(long, env = "TCP_SERVICES_CONFIGMAP")]
    pub tcp_services_configmap: Option<String>,

    /// ConfigMap (`namespace/name`) exposing UDP services
    #[arg(long, env = "UDP_SERVICES_CONFIGMAP")]
    pub udp_services_configmap: Option<String>,

    /// Service (`namespace/name`) fronting the controller; its load balancer
    /// addresses are published on every ingress
    #[arg(long, env = "PUBLISH_SERVICE")]
    pub publish_service: Option<String>,

    /// Namespace to watch, all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Secret (`namespace/name`) used as default SSL certificate
    #[arg(long, env = "DEFAULT_SSL_CERTIFICATE")]
    pub default_ssl_certificate: Option<String>,

    /// Seconds between full resyncs
    #[arg(long, env = "SYNC_PERIOD", default_value_t = DEFAULT_SYNC_PERIOD_SECS)]
    pub sync_period: u64,

    /// Publish the controller address on ingress status
    #[arg(long, env = "UPDATE_STATUS", default_value_t = true, action = clap::ArgAction::Set)]
    pub update_status: bool,

    /// Name of the leader election lease
    #[arg(long, env = "ELECTION_ID", default_value = DEFAULT_ELECTION_ID)]
    pub election_id: String,

    /// Clear published addresses on shutdown when this is the only replica
    #[arg(long, env = "UPDATE_STATUS_ON_SHUTDOWN", default_value_t = true, action = clap::ArgAction::Set)]
    pub update_status_on_shutdown: bool,

    /// Seconds between status updates
    #[arg(long, env = "STATUS_UPDATE_INTERVAL", default_value_t = DEFAULT_STATUS_UPDATE_INTERVAL_SECS)]
    pub status_update_interval: u64,

    /// Directory receiving persisted certificate material
    #[arg(long, env = "SSL_DIRECTORY", default_value = DEFAULT_SSL_DIRECTORY)]
    pub ssl_directory: PathBuf,

    /// Directory receiving generated authentication files
    #[arg(long, env = "AUTH_DIRECTORY", default_value = DEFAULT_AUTH_DIRECTORY)]
    pub auth_directory: PathBuf,

    /// Placeholder endpoint (`address:port`) for Backends without endpoints
    #[arg(long, env = "SENTINEL_ENDPOINT", default_value = DEFAULT_SENTINEL_ENDPOINT)]
    pub sentinel_endpoint: String,

    /// Port of the health and metrics server
    #[arg(long, env = "HEALTH_PORT", default_value_t = DEFAULT_HEALTH_PORT)]
    pub health_port: u16,

    /// File written by the JSON reference backend
    #[arg(long, env = "CONFIG_OUTPUT", default_value = DEFAULT_CONFIG_OUTPUT)]
    pub config_output: PathBuf,

    /// Name of this pod (downward API)
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Namespace of this pod (downward API)
    #[arg(long, env = "POD_NAMESPACE")]
    pub pod_namespace: Option<String>,
}

impl ControllerConfig {
    /// Checks cross-field constraints clap cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        for (flag, value) in [
            ("--default-backend-service", Some(&self.default_backend_service)),
            ("--configmap", self.configmap.as_ref()),
            ("--tcp-services-configmap", self.tcp_services_configmap.as_ref()),
            ("--udp-services-configmap", self.udp_services_configmap.as_ref()),
            ("--publish-service", self.publish_service.as_ref()),
            ("--default-ssl-certificate", self.default_ssl_certificate.as_ref()),
        ] {
            if let Some(value) = value {
                if !is_namespaced_key(value) {
                    bail!("{flag} must be in the form namespace/name, got '{value}'");
                }
            }
        }

        if self.sentinel_endpoint.rsplit_once(':').is_none() {
            bail!(
                "--sentinel-endpoint must be in the form address:port, got '{}'",
                self.sentinel_endpoint
            );
        }
        if self.sync_period == 0 || self.status_update_interval == 0 {
            bail!("--sync-period and --status-update-interval must be positive");
        }
        Ok(())
    }

    #[must_use]
    pub fn class_filter(&self) -> IngressClassFilter {
        IngressClassFilter::new(self.ingress_class.clone(), self.default_ingress_class.clone())
    }

    /// Sentinel endpoint split into address and port.
    #[must_use]
    pub fn sentinel(&self) -> (String, String) {
        split_endpoint(&self.sentinel_endpoint)
    }

    #[must_use]
    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period)
    }

    #[must_use]
    pub fn status_update_interval(&self) -> Duration {
        Duration::from_secs(self.status_update_interval)
    }

    /// Namespace holding the leader election lease.
    #[must_use]
    pub fn lease_namespace(&self) -> String {
        self.pod_namespace
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }

    /// Identity used for leader election.
    #[must_use]
    pub fn identity(&self) -> String {
        self.pod_name
            .clone()
            .unwrap_or_else(|| format!("ingress-controller-{}", std::process::id()))
    }
}

fn is_namespaced_key(value: &str) -> bool {
    matches!(value.split_once('/'), Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/'))
}

/// Splits `address:port`, keeping bracketed IPv6 addresses intact.
#[must_use]
pub fn split_endpoint(endpoint: &str) -> (String, String) {
    match endpoint.rsplit_once(':') {
        Some((address, port)) => (
            address.trim_start_matches('[').trim_end_matches(']').to_string(),
            port.to_string(),
        ),
        None => (endpoint.to_string(), String::new()),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
