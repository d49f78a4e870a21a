// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `sync.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::annotations::IngressClassFilter;
    use crate::backend::BackendInfo;
    use crate::builder::BuilderSettings;
    use crate::defaults::BackendDefaults;
    use crate::ssl::CertificateTracker;
    use crate::store::Cache;
    use crate::testing::{cache, endpoints, ingress, meta, service, RecordingClusterClient};
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher::Event;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingBackend {
        renders: AtomicUsize,
        reloads: AtomicUsize,
        fail_render: AtomicBool,
        fail_reload: AtomicBool,
        last_defaults: Mutex<Option<BackendDefaults>>,
    }

    #[async_trait]
    impl ProxyBackend for RecordingBackend {
        fn backend_defaults(&self) -> BackendDefaults {
            BackendDefaults::default()
        }

        async fn on_update(
            &self,
            defaults: &BackendDefaults,
            config: &Configuration,
        ) -> anyhow::Result<Vec<u8>> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            *self.last_defaults.lock().unwrap() = Some(defaults.clone());
            if self.fail_render.load(Ordering::SeqCst) {
                anyhow::bail!("template error");
            }
            Ok(serde_json::to_vec(config)?)
        }

        async fn reload(&self, _rendered: &[u8]) -> anyhow::Result<ReloadOutcome> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reload.load(Ordering::SeqCst) {
                anyhow::bail!("proxy refused configuration");
            }
            Ok(ReloadOutcome::Reloaded("ok".to_string()))
        }

        fn info(&self) -> BackendInfo {
            BackendInfo {
                name: "recording".to_string(),
                release: "0".to_string(),
                build: "test".to_string(),
                repository: "local".to_string(),
            }
        }

        async fn check(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        engine: SyncEngine,
        backend: Arc<RecordingBackend>,
        configmaps: Writer<ConfigMap>,
        _dir: tempfile::TempDir,
    }

    fn harness(ingresses_synced: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let (ingress_reader, mut ingress_writer) = kube::runtime::reflector::store::<Ingress>();
        ingress_writer.apply_watcher_event(&Event::Apply(ingress(
            "default", "web", "a.com", "/", "web", 80,
        )));
        let ingresses = Arc::new(Cache::new(ingress_reader));
        if ingresses_synced {
            ingresses.mark_synced();
        }

        let (configmap_reader, configmaps) = kube::runtime::reflector::store::<ConfigMap>();
        let configmap_cache = Arc::new(Cache::new(configmap_reader));
        configmap_cache.mark_synced();

        let secrets = cache(Vec::<Secret>::new());
        let tracker = Arc::new(CertificateTracker::new());
        let class_filter = IngressClassFilter::new(None, "nginx");
        let synchronizer = Arc::new(SecretSynchronizer::new(
            secrets.clone(),
            ingresses.clone(),
            tracker.clone(),
            class_filter.clone(),
            dir.path(),
            None,
        ));

        let builder = Builder::new(
            cache::<Service>(vec![service("default", "web", 80, IntOrString::Int(8080))]),
            cache::<Endpoints>(vec![endpoints("default", "web", &["10.0.0.1"], 8080)]),
            secrets,
            configmap_cache.clone(),
            tracker,
            Arc::new(RecordingClusterClient::default()),
            BuilderSettings {
                default_backend_service: "default/default-http-backend".to_string(),
                class_filter,
                sentinel_address: "127.0.0.1".to_string(),
                sentinel_port: "8181".to_string(),
                tcp_services_configmap: None,
                udp_services_configmap: None,
                auth_dir: dir.path().to_path_buf(),
            },
        );

        let backend = Arc::new(RecordingBackend::default());
        let engine = SyncEngine::new(
            builder,
            backend.clone(),
            synchronizer,
            ingresses,
            configmap_cache,
            Some("default/controller-config".to_string()),
        )
        .with_rate_limit(1000.0, 10);

        Harness {
            engine,
            backend,
            configmaps,
            _dir: dir,
        }
    }

    fn overrides(pairs: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: meta("default", "controller-config"),
            data: Some(
                pairs
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unsynced_caches_requeue_without_building() {
        let h = harness(false);

        let action = h.engine.sync().await.unwrap();

        assert_eq!(
            action,
            QueueAction::RequeueAfter(Duration::from_secs(CACHE_NOT_READY_REQUEUE_SECS))
        );
        assert_eq!(h.backend.renders.load(Ordering::SeqCst), 0);
        assert!(h.engine.running_configuration().is_none());
    }

    #[tokio::test]
    async fn test_unchanged_configuration_skips_reload() {
        let h = harness(true);

        assert_eq!(h.engine.sync().await.unwrap(), QueueAction::Done);
        assert_eq!(h.engine.sync().await.unwrap(), QueueAction::Done);

        assert_eq!(h.backend.renders.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.reloads.load(Ordering::SeqCst), 1);
        let running = h.engine.running_configuration().unwrap();
        assert!(running.backend("default-web-80").is_some());
    }

    #[tokio::test]
    async fn test_requested_reload_bypasses_equality() {
        let h = harness(true);

        h.engine.sync().await.unwrap();
        h.engine.request_reload();
        h.engine.sync().await.unwrap();
        h.engine.sync().await.unwrap();

        assert_eq!(h.backend.reloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_overrides_change_forces_reload_with_merged_defaults() {
        let mut h = harness(true);
        h.configmaps
            .apply_watcher_event(&Event::Apply(overrides(&[("proxy-read-timeout", "120")])));

        h.engine.sync().await.unwrap();
        h.configmaps
            .apply_watcher_event(&Event::Apply(overrides(&[("proxy-read-timeout", "300")])));
        h.engine.sync().await.unwrap();

        assert_eq!(h.backend.reloads.load(Ordering::SeqCst), 2);
        let defaults = h.backend.last_defaults.lock().unwrap().clone().unwrap();
        assert_eq!(defaults.proxy_read_timeout, 300);
    }

    #[tokio::test]
    async fn test_render_failure_keeps_running_configuration() {
        let h = harness(true);
        h.backend.fail_render.store(true, Ordering::SeqCst);

        let err = h.engine.sync().await.unwrap_err();

        assert!(matches!(err, SyncError::RenderFailed { ref backend, .. } if backend == "recording"));
        assert_eq!(h.backend.reloads.load(Ordering::SeqCst), 0);
        assert!(h.engine.running_configuration().is_none());

        h.backend.fail_render.store(false, Ordering::SeqCst);
        assert_eq!(h.engine.sync().await.unwrap(), QueueAction::Done);
        assert!(h.engine.running_configuration().is_some());
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_running_configuration_and_retries() {
        let h = harness(true);
        h.engine.sync().await.unwrap();
        let previous = h.engine.running_configuration().unwrap();

        h.engine.request_reload();
        h.backend.fail_reload.store(true, Ordering::SeqCst);
        let err = h.engine.sync().await.unwrap_err();

        assert!(matches!(err, SyncError::ReloadFailed { ref backend, .. } if backend == "recording"));
        assert_eq!(h.engine.running_configuration(), Some(previous));
        assert_eq!(h.backend.reloads.load(Ordering::SeqCst), 2);

        h.backend.fail_reload.store(false, Ordering::SeqCst);
        assert_eq!(h.engine.sync().await.unwrap(), QueueAction::Done);
        assert_eq!(h.backend.reloads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_reload_failure_is_retried_on_next_pass() {
        let h = harness(true);
        h.backend.fail_reload.store(true, Ordering::SeqCst);

        assert!(matches!(
            h.engine.sync().await.unwrap_err(),
            SyncError::ReloadFailed { .. }
        ));
        assert!(h.engine.running_configuration().is_none());

        h.backend.fail_reload.store(false, Ordering::SeqCst);
        assert_eq!(h.engine.sync().await.unwrap(), QueueAction::Done);
        assert_eq!(h.backend.renders.load(Ordering::SeqCst), 2);
        assert_eq!(h.backend.reloads.load(Ordering::SeqCst), 2);
        assert!(h.engine.running_configuration().is_some());
    }
}
