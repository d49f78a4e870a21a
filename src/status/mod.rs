// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status Sync: publishes the controller's reachable addresses on every managed
//! `Ingress`.
//!
//! Only the leader writes. Addresses come from the load balancer status of the
//! publish Service when one is configured, otherwise from the nodes running the
//! controller's own pods. An `Ingress` is written only when its published set
//! differs from the running set, ignoring order.

pub mod election;

pub use election::{LeaderElector, LeaseElector, LeaseSettings, StaticElector};

use crate::annotations::IngressClassFilter;
use crate::cluster::{selector_string, ClusterClient};
use crate::metrics;
use crate::store::{split_key, ObjectCache};
use anyhow::Result;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::networking::v1::{Ingress, IngressLoadBalancerIngress};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

const NODE_EXTERNAL_IP: &str = "ExternalIP";
const NODE_INTERNAL_IP: &str = "InternalIP";
const SERVICE_TYPE_EXTERNAL_NAME: &str = "ExternalName";

#[derive(Clone, Debug)]
pub struct StatusSettings {
    /// Service (`namespace/name`) whose load balancer addresses are published
    pub publish_service: Option<String>,
    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
    /// Clear published addresses on shutdown when this is the only replica
    pub update_status_on_shutdown: bool,
    pub interval: Duration,
    pub class_filter: IngressClassFilter,
}

pub struct StatusSync {
    cluster: Arc<dyn ClusterClient>,
    ingresses: Arc<dyn ObjectCache<Ingress>>,
    elector: Arc<dyn LeaderElector>,
    settings: StatusSettings,
    kick: Notify,
}

/// Turns an address into a status entry, IPs and hostnames kept apart.
fn to_status(address: &str) -> IngressLoadBalancerIngress {
    if address.parse::<IpAddr>().is_ok() {
        IngressLoadBalancerIngress {
            ip: Some(address.to_string()),
            ..Default::default()
        }
    } else {
        IngressLoadBalancerIngress {
            hostname: Some(address.to_string()),
            ..Default::default()
        }
    }
}

fn status_key(entry: &IngressLoadBalancerIngress) -> (String, String) {
    (
        entry.ip.clone().unwrap_or_default(),
        entry.hostname.clone().unwrap_or_default(),
    )
}

/// Order-insensitive comparison of two published address sets.
#[must_use]
pub fn same_addresses(a: &[IngressLoadBalancerIngress], b: &[IngressLoadBalancerIngress]) -> bool {
    let a: BTreeSet<_> = a.iter().map(status_key).collect();
    let b: BTreeSet<_> = b.iter().map(status_key).collect();
    a == b
}

fn published(ing: &Ingress) -> Vec<IngressLoadBalancerIngress> {
    ing.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.clone())
        .unwrap_or_default()
}

/// External address of a node, falling back to its internal address.
fn node_address(node: &Node) -> Option<String> {
    let addresses = node.status.as_ref()?.addresses.as_ref()?;
    [NODE_EXTERNAL_IP, NODE_INTERNAL_IP].iter().find_map(|kind| {
        addresses
            .iter()
            .find(|a| a.type_ == *kind && !a.address.is_empty())
            .map(|a| a.address.clone())
    })
}

impl StatusSync {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        ingresses: Arc<dyn ObjectCache<Ingress>>,
        elector: Arc<dyn LeaderElector>,
        settings: StatusSettings,
    ) -> Self {
        Self {
            cluster,
            ingresses,
            elector,
            settings,
            kick: Notify::new(),
        }
    }

    /// Requests an update ahead of the next tick.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Pods running this controller, found through the labels of its own pod.
    async fn controller_pods(&self) -> Result<Vec<Pod>> {
        let (Some(namespace), Some(name)) = (&self.settings.pod_namespace, &self.settings.pod_name) else {
            return Ok(Vec::new());
        };
        let Some(own) = self.cluster.get_pod(namespace, name).await? else {
            warn!(pod = %name, namespace = %namespace, "Controller pod not found");
            return Ok(Vec::new());
        };
        let labels = own.metadata.labels.clone().unwrap_or_default();
        if labels.is_empty() {
            return Ok(vec![own]);
        }
        self.cluster.list_pods(namespace, &selector_string(&labels)).await
    }

    /// Addresses through which the controller is reachable, sorted.
    ///
    /// A publish Service contributes its load balancer entries and external IPs, or
    /// only its external name when it is of type `ExternalName`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster API cannot be queried or the publish Service
    /// does not exist. Nothing is published in that case.
    pub async fn running_addresses(&self) -> Result<Vec<IngressLoadBalancerIngress>> {
        let mut addresses = BTreeSet::new();

        if let Some(key) = &self.settings.publish_service {
            let (namespace, name) = split_key(key);
            let svc = self
                .cluster
                .get_service(namespace.unwrap_or_default(), name)
                .await?;
            let Some(svc) = svc else {
                anyhow::bail!("publish service {key} not found");
            };
            let spec = svc.spec.as_ref();
            if let Some(external_name) = spec
                .filter(|s| s.type_.as_deref() == Some(SERVICE_TYPE_EXTERNAL_NAME))
                .and_then(|s| s.external_name.as_ref())
            {
                return Ok(vec![to_status(external_name)]);
            }
            let lb = svc
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref());
            for entry in lb.into_iter().flatten() {
                if let Some(address) = entry.ip.as_ref().or(entry.hostname.as_ref()) {
                    addresses.insert(address.clone());
                }
            }
            addresses.extend(spec.and_then(|s| s.external_ips.clone()).unwrap_or_default());
        } else {
            for pod in self.controller_pods().await? {
                if pod.metadata.deletion_timestamp.is_some() {
                    continue;
                }
                let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) else {
                    continue;
                };
                match self.cluster.get_node(node_name).await? {
                    Some(node) => {
                        if let Some(address) = node_address(&node) {
                            addresses.insert(address);
                        }
                    }
                    None => debug!(node = %node_name, "Node of controller pod not found"),
                }
            }
        }

        Ok(addresses.iter().map(|a| to_status(a)).collect())
    }

    /// Publishes the running addresses when leading. Returns the number of writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the running addresses cannot be determined.
    pub async fn sync(&self) -> Result<usize> {
        if !self.elector.is_leader() {
            debug!("Not the leader, skipping status update");
            return Ok(0);
        }
        let addresses = self.running_addresses().await?;
        Ok(self.publish(&addresses).await)
    }

    /// Writes `addresses` to every managed `Ingress` whose status differs.
    async fn publish(&self, addresses: &[IngressLoadBalancerIngress]) -> usize {
        let mut writes = 0;
        for cached in self.ingresses.list() {
            if !self.settings.class_filter.is_managed(&cached) {
                continue;
            }
            let namespace = cached.metadata.namespace.as_deref().unwrap_or_default();
            let name = cached.metadata.name.as_deref().unwrap_or_default();

            let current = match self.cluster.get_ingress(namespace, name).await {
                Ok(Some(current)) => current,
                Ok(None) => continue,
                Err(e) => {
                    warn!(ingress = %name, namespace = %namespace, error = %e, "Failed to fetch ingress");
                    metrics::record_status_update("error");
                    continue;
                }
            };
            if same_addresses(&published(&current), addresses) {
                debug!(ingress = %name, namespace = %namespace, "Ingress status up to date");
                metrics::record_status_update("unchanged");
                continue;
            }
            if !self.elector.is_leader() {
                info!("Leadership lost, stopping status update");
                break;
            }

            match self
                .cluster
                .update_ingress_status(namespace, name, addresses.to_vec())
                .await
            {
                Ok(()) => {
                    info!(ingress = %name, namespace = %namespace, addresses = addresses.len(), "Updated ingress status");
                    metrics::record_status_update("updated");
                    writes += 1;
                }
                Err(e) => {
                    warn!(ingress = %name, namespace = %namespace, error = %e, "Failed to update ingress status");
                    metrics::record_status_update("error");
                }
            }
        }
        writes
    }

    /// Clears published addresses when this leader is the only replica.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller pods cannot be listed.
    pub async fn shutdown(&self) -> Result<usize> {
        if !self.settings.update_status_on_shutdown {
            return Ok(0);
        }
        if !self.elector.is_leader() {
            debug!("Not the leader, leaving ingress status to the next leader");
            return Ok(0);
        }
        let replicas = self.controller_pods().await?.len();
        if replicas > 1 {
            info!(replicas = replicas, "Other controller replicas running, keeping ingress status");
            return Ok(0);
        }
        info!("Clearing ingress status on shutdown");
        Ok(self.publish(&[]).await)
    }

    /// Updates on every tick, kick and leadership gain until `shutdown` fires,
    /// then runs [`StatusSync::shutdown`].
    pub async fn run(self: Arc<Self>, identity: String, mut shutdown: watch::Receiver<bool>) {
        let mut leader = self.elector.subscribe();
        let mut leader_open = true;
        let mut ticker = tokio::time::interval(self.settings.interval);
        info!(interval_secs = self.settings.interval.as_secs(), "Status sync started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.kick.notified() => {}
                changed = leader.changed(), if leader_open => {
                    if changed.is_err() {
                        leader_open = false;
                        continue;
                    }
                    if *leader.borrow_and_update() {
                        info!(identity = %identity, "Became leader");
                        metrics::record_leader_elected(&identity);
                    } else {
                        info!(identity = %identity, "Lost leadership");
                        metrics::record_leader_lost(&identity);
                        continue;
                    }
                }
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.sync().await {
                warn!(error = %e, "Status update failed");
                metrics::record_status_update("error");
            }
        }

        match self.shutdown().await {
            Ok(cleared) => info!(cleared = cleared, "Status sync stopped"),
            Err(e) => warn!(error = %e, "Failed to clear ingress status on shutdown"),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
