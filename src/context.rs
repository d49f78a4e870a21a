// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared caches and event routing for the controller.
//!
//! Every watched kind is mirrored by one reflector task. Each task feeds its
//! [`Cache`] and hands every change to the [`EventRouter`], which turns it into
//! work: a rebuild request for the Sync Engine and, for secrets, a key on the
//! secret queue.

use crate::constants::SYNC_QUEUE_ITEM;
use crate::errors::CertificateError;
use crate::queue::{QueueAction, TaskQueue};
use crate::selector::referenced_secrets;
use crate::ssl::{SecretSynchronizer, SyncOutcome};
use crate::status::StatusSync;
use crate::store::{object_key, Cache, ObjectCache};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kind of change delivered by a reflector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Applied,
    Deleted,
}

/// Reflector-backed caches for every watched kind.
#[derive(Clone)]
pub struct Caches {
    pub ingresses: Arc<Cache<Ingress>>,
    pub services: Arc<Cache<Service>>,
    pub endpoints: Arc<Cache<Endpoints>>,
    pub secrets: Arc<Cache<Secret>>,
    pub configmaps: Arc<Cache<ConfigMap>>,
}

/// Write halves of [`Caches`], one per reflector task.
pub struct Writers {
    pub ingresses: Writer<Ingress>,
    pub services: Writer<Service>,
    pub endpoints: Writer<Endpoints>,
    pub secrets: Writer<Secret>,
    pub configmaps: Writer<ConfigMap>,
}

impl Caches {
    /// Creates empty, unsynced caches and their writers.
    #[must_use]
    pub fn new() -> (Self, Writers) {
        let (ingresses, ingress_writer) = kube::runtime::reflector::store();
        let (services, service_writer) = kube::runtime::reflector::store();
        let (endpoints, endpoints_writer) = kube::runtime::reflector::store();
        let (secrets, secret_writer) = kube::runtime::reflector::store();
        let (configmaps, configmap_writer) = kube::runtime::reflector::store();

        let caches = Self {
            ingresses: Arc::new(Cache::new(ingresses)),
            services: Arc::new(Cache::new(services)),
            endpoints: Arc::new(Cache::new(endpoints)),
            secrets: Arc::new(Cache::new(secrets)),
            configmaps: Arc::new(Cache::new(configmaps)),
        };
        let writers = Writers {
            ingresses: ingress_writer,
            services: service_writer,
            endpoints: endpoints_writer,
            secrets: secret_writer,
            configmaps: configmap_writer,
        };
        (caches, writers)
    }

    /// True once every reflector delivered its initial listing.
    #[must_use]
    pub fn all_synced(&self) -> bool {
        self.ingresses.has_synced()
            && self.services.has_synced()
            && self.endpoints.has_synced()
            && self.secrets.has_synced()
            && self.configmaps.has_synced()
    }
}

/// Mirrors `api` into `cache` and reports every change to `on_change`.
///
/// Runs until the watch stream ends, which only happens when the task is dropped;
/// watch errors are logged and retried with backoff.
pub async fn reflect<K, F>(api: Api<K>, mut writer: Writer<K>, cache: Arc<Cache<K>>, mut on_change: F)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: FnMut(&K, Change) + Send,
{
    let kind = K::kind(&()).to_string();
    info!(kind = %kind, "Starting reflector");

    let mut stream = watch_stream(api).boxed();
    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Watch error, retrying");
                continue;
            }
        };
        writer.apply_watcher_event(&event);
        match &event {
            Event::Init => debug!(kind = %kind, "Initial listing started"),
            Event::InitDone => {
                if !cache.has_synced() {
                    info!(kind = %kind, objects = cache.list().len(), "Cache synced");
                }
                cache.mark_synced();
            }
            Event::Apply(obj) | Event::InitApply(obj) => on_change(obj, Change::Applied),
            Event::Delete(obj) => on_change(obj, Change::Deleted),
        }
    }
    warn!(kind = %kind, "Reflector stream ended");
}

fn watch_stream<K>(
    api: Api<K>,
) -> impl futures::Stream<Item = Result<Event<K>, watcher::Error>> + Send
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    watcher::watcher(api, watcher::Config::default()).default_backoff()
}

/// Turns cache changes into queued work.
pub struct EventRouter {
    rebuild: Arc<TaskQueue<String>>,
    secrets: Arc<TaskQueue<String>>,
    /// ConfigMaps (`namespace/name`) whose changes affect the configuration
    watched_configmaps: BTreeSet<String>,
    status: Option<Arc<StatusSync>>,
}

impl EventRouter {
    #[must_use]
    pub fn new(
        rebuild: Arc<TaskQueue<String>>,
        secrets: Arc<TaskQueue<String>>,
        watched_configmaps: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            rebuild,
            secrets,
            watched_configmaps: watched_configmaps.into_iter().collect(),
            status: None,
        }
    }

    /// Kicks Status Sync whenever an ingress is applied.
    #[must_use]
    pub fn with_status(mut self, status: Arc<StatusSync>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn request_rebuild(&self) {
        self.rebuild.enqueue(SYNC_QUEUE_ITEM.to_string());
    }

    /// Any ingress change may alter the configuration, including a class change
    /// that takes it out of this controller's hands.
    pub fn ingress_changed(&self, ing: &Ingress, change: Change) {
        debug!(ingress = %object_key(ing), change = ?change, "Ingress changed");
        if change == Change::Applied {
            for key in referenced_secrets(ing) {
                self.secrets.enqueue(key);
            }
            if let Some(status) = &self.status {
                status.kick();
            }
        }
        self.request_rebuild();
    }

    pub fn service_changed(&self, svc: &Service, change: Change) {
        debug!(service = %object_key(svc), change = ?change, "Service changed");
        self.request_rebuild();
    }

    pub fn endpoints_changed(&self, ep: &Endpoints, change: Change) {
        debug!(endpoints = %object_key(ep), change = ?change, "Endpoints changed");
        self.request_rebuild();
    }

    /// Secrets are resolved on the secret queue; whether they matter is decided
    /// there against the current ingresses.
    pub fn secret_changed(&self, secret: &Secret, _change: Change) {
        self.secrets.enqueue(object_key(secret));
    }

    pub fn configmap_changed(&self, cm: &ConfigMap, change: Change) {
        let key = object_key(cm);
        if self.watched_configmaps.contains(&key) {
            info!(configmap = %key, change = ?change, "Configuration ConfigMap changed");
            self.request_rebuild();
        }
    }
}

/// Secret queue handler: syncs a present secret, forgets a deleted one, and
/// requests a rebuild when tracked material changed.
///
/// # Errors
///
/// Returns [`CertificateError`] when a referenced secret holds unusable material;
/// the queue retries it with backoff.
pub async fn process_secret(
    synchronizer: &SecretSynchronizer,
    secrets: &dyn ObjectCache<Secret>,
    rebuild: &TaskQueue<String>,
    key: &str,
) -> Result<QueueAction, CertificateError> {
    let changed = if secrets.get_by_key(key).is_some() {
        matches!(
            synchronizer.sync_secret(key).await?,
            SyncOutcome::Added | SyncOutcome::Updated
        )
    } else {
        synchronizer.delete_secret(key)
    };
    if changed {
        rebuild.enqueue(SYNC_QUEUE_ITEM.to_string());
    }
    Ok(QueueAction::Done)
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
