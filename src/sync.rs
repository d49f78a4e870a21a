// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Sync Engine: one reconciliation pass per dequeued rebuild request.
//!
//! Passes run on the single worker of the rebuild [`TaskQueue`](crate::queue::TaskQueue)
//! and are additionally throttled by a token bucket. A pass:
//!
//! 1. Requeues itself shortly when any cache has not completed its initial list.
//! 2. Ensures the default certificate exists.
//! 3. Merges the overrides ConfigMap over the backend defaults.
//! 4. Builds a [`Configuration`].
//! 5. Skips the backend when the snapshot equals the running one and no forced
//!    reload is pending; otherwise renders and reloads.
//!
//! A failed render or reload leaves the running configuration untouched and is
//! returned to the queue for a retry with backoff.

use crate::backend::{ProxyBackend, ReloadOutcome};
use crate::builder::Builder;
use crate::constants::{CACHE_NOT_READY_REQUEUE_SECS, SYNC_RATE_LIMIT_BURST, SYNC_RATE_LIMIT_QPS};
use crate::errors::SyncError;
use crate::metrics;
use crate::model::Configuration;
use crate::queue::QueueAction;
use crate::ratelimit::TokenBucket;
use crate::ssl::SecretSynchronizer;
use crate::store::ObjectCache;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Default)]
struct RunningState {
    /// Last configuration handed successfully to the backend
    configuration: Option<Configuration>,
    /// Overrides used by the last pass
    overrides: Option<BTreeMap<String, String>>,
    force_reload: bool,
}

pub struct SyncEngine {
    builder: Builder,
    backend: Arc<dyn ProxyBackend>,
    secrets: Arc<SecretSynchronizer>,
    ingresses: Arc<dyn ObjectCache<Ingress>>,
    configmaps: Arc<dyn ObjectCache<ConfigMap>>,
    /// Overrides ConfigMap (`namespace/name`)
    overrides_configmap: Option<String>,
    limiter: TokenBucket,
    state: Mutex<RunningState>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        builder: Builder,
        backend: Arc<dyn ProxyBackend>,
        secrets: Arc<SecretSynchronizer>,
        ingresses: Arc<dyn ObjectCache<Ingress>>,
        configmaps: Arc<dyn ObjectCache<ConfigMap>>,
        overrides_configmap: Option<String>,
    ) -> Self {
        Self {
            builder,
            backend,
            secrets,
            ingresses,
            configmaps,
            overrides_configmap,
            limiter: TokenBucket::new(SYNC_RATE_LIMIT_QPS, SYNC_RATE_LIMIT_BURST),
            state: Mutex::new(RunningState::default()),
        }
    }

    /// Replaces the rate limiter. A `qps` that is not positive disables throttling.
    #[must_use]
    pub fn with_rate_limit(mut self, qps: f64, burst: u32) -> Self {
        self.limiter = TokenBucket::new(qps, burst);
        self
    }

    /// Makes the next pass reload even when the snapshot is unchanged.
    pub fn request_reload(&self) {
        self.lock().force_reload = true;
    }

    /// Configuration currently active in the backend.
    #[must_use]
    pub fn running_configuration(&self) -> Option<Configuration> {
        self.lock().configuration.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunningState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn caches_synced(&self) -> bool {
        self.ingresses.has_synced() && self.configmaps.has_synced() && self.builder.caches_synced()
    }

    fn current_overrides(&self) -> BTreeMap<String, String> {
        self.overrides_configmap
            .as_deref()
            .and_then(|key| self.configmaps.get_by_key(key))
            .and_then(|cm| cm.data.clone())
            .unwrap_or_default()
    }

    /// Runs one pass. Queue handler for rebuild requests.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the default certificate cannot be ensured or the
    /// backend fails to render or reload.
    pub async fn sync(&self) -> Result<QueueAction, SyncError> {
        let start = Instant::now();

        if !self.caches_synced() {
            debug!("Caches not synced yet, requeueing rebuild");
            metrics::record_reconciliation_requeue();
            return Ok(QueueAction::RequeueAfter(Duration::from_secs(
                CACHE_NOT_READY_REQUEUE_SECS,
            )));
        }

        self.limiter.acquire().await;

        match self.run_pass().await {
            Ok(()) => {
                metrics::record_reconciliation_success(start.elapsed());
                Ok(QueueAction::Done)
            }
            Err(e) => {
                error!(error = %e, "Reconciliation pass failed");
                metrics::record_reconciliation_error(start.elapsed());
                metrics::record_error("sync", e.metric_label());
                Err(e)
            }
        }
    }

    async fn run_pass(&self) -> Result<(), SyncError> {
        self.secrets.ensure_default_certificate().await?;

        let overrides = self.current_overrides();
        {
            let mut state = self.lock();
            if state.overrides.as_ref().is_some_and(|previous| *previous != overrides) {
                info!("Controller overrides changed, forcing reload");
                state.force_reload = true;
            }
            state.overrides = Some(overrides.clone());
        }
        let defaults = self.backend.backend_defaults().merge_overrides(&overrides);

        let ingresses = self.ingresses.list();
        let config = self.builder.build(&ingresses, &defaults).await;

        {
            let state = self.lock();
            if !state.force_reload && state.configuration.as_ref() == Some(&config) {
                debug!("Configuration unchanged, skipping backend reload");
                return Ok(());
            }
        }

        let backend_name = self.backend.info().name;
        let rendered = self.backend.on_update(&defaults, &config).await.map_err(|e| {
            metrics::record_reload("error");
            SyncError::RenderFailed {
                backend: backend_name.clone(),
                reason: format!("{e:#}"),
            }
        })?;

        let outcome = self.backend.reload(&rendered).await.map_err(|e| {
            metrics::record_reload("error");
            SyncError::ReloadFailed {
                backend: backend_name.clone(),
                reason: format!("{e:#}"),
            }
        })?;
        metrics::record_reload(outcome.as_str());
        match &outcome {
            ReloadOutcome::Reloaded(output) => {
                info!(backend = %backend_name, output = %output, "Backend reloaded");
            }
            ReloadOutcome::Unchanged => {
                debug!(backend = %backend_name, "Backend reports no change");
            }
        }

        for server in &config.servers {
            if let Some(expire) = server.ssl_expire_time {
                metrics::record_ssl_expire_time(&server.hostname, expire);
            }
        }

        let mut state = self.lock();
        state.configuration = Some(config);
        state.force_reload = false;
        Ok(())
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod sync_tests;
