// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Leader election seam.
//!
//! Status Sync only needs to know whether this replica currently leads and to be
//! told when that changes. [`LeaseElector`] gets the answer from a coordination
//! `Lease` managed by `kube-lease-manager`; [`StaticElector`] is set by hand.

use crate::constants::{DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_GRACE_SECS};
use anyhow::{Context, Result};
use kube::Client;
use kube_lease_manager::LeaseManagerBuilder;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub trait LeaderElector: Send + Sync {
    /// Returns true while this replica holds leadership.
    fn is_leader(&self) -> bool;

    /// Channel signalling leadership transitions.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Leadership decided by the caller.
#[derive(Debug)]
pub struct StaticElector {
    state: watch::Sender<bool>,
}

impl StaticElector {
    #[must_use]
    pub fn new(leader: bool) -> Self {
        let (state, _) = watch::channel(leader);
        Self { state }
    }

    pub fn set_leader(&self, leader: bool) {
        self.state.send_replace(leader);
    }
}

impl LeaderElector for StaticElector {
    fn is_leader(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Lease parameters.
#[derive(Clone, Debug)]
pub struct LeaseSettings {
    pub name: String,
    pub namespace: String,
    pub identity: String,
    /// Seconds
    pub duration: u64,
    /// Seconds
    pub grace: u64,
}

impl LeaseSettings {
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            identity: identity.into(),
            duration: DEFAULT_LEASE_DURATION_SECS,
            grace: DEFAULT_LEASE_GRACE_SECS,
        }
    }
}

/// Leadership backed by a coordination `Lease`.
///
/// The lease is held as long as the elector lives; [`LeaseElector::release`] gives
/// it up so another replica can take over immediately.
pub struct LeaseElector {
    state: watch::Receiver<bool>,
    task: JoinHandle<kube_lease_manager::Result<kube_lease_manager::LeaseManager>>,
    identity: String,
}

impl LeaseElector {
    /// Starts competing for the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease manager cannot be created, which means leader
    /// election is unavailable.
    pub async fn start(client: Client, settings: LeaseSettings) -> Result<Self> {
        info!(
            lease = %settings.name,
            namespace = %settings.namespace,
            identity = %settings.identity,
            "Starting leader election"
        );
        let manager = LeaseManagerBuilder::new(client, &settings.name)
            .with_namespace(&settings.namespace)
            .with_identity(&settings.identity)
            .with_duration(settings.duration)
            .with_grace(settings.grace)
            .build()
            .await
            .context("Failed to create leader election lease manager")?;
        let (state, task) = manager.watch().await;

        Ok(Self {
            state,
            task,
            identity: settings.identity,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Releases the lease and waits for the manager to stop.
    pub async fn release(self) {
        let Self { state, task, identity } = self;
        drop(state);
        match task.await {
            Ok(Ok(_)) => info!(identity = %identity, "Leader election lease released"),
            Ok(Err(e)) => warn!(identity = %identity, error = %e, "Lease manager stopped with an error"),
            Err(e) => warn!(identity = %identity, error = %e, "Lease manager task failed"),
        }
    }
}

impl LeaderElector for LeaseElector {
    fn is_leader(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }
}
