// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for context.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::annotations::IngressClassFilter;
    use crate::constants::{SECRET_TLS_CERT_KEY, SECRET_TLS_KEY_KEY};
    use crate::ssl::{generate_self_signed, CertificateTracker};
    use crate::testing::{endpoints, ingress, meta, service};
    use k8s_openapi::api::networking::v1::IngressTLS;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use k8s_openapi::ByteString;
    use kube::runtime::watcher::Event;
    use std::collections::BTreeMap;

    fn queues() -> (Arc<TaskQueue<String>>, Arc<TaskQueue<String>>) {
        (TaskQueue::new("rebuild"), TaskQueue::new("secrets"))
    }

    fn tls_ingress(secret: &str) -> Ingress {
        let mut ing = ingress("default", "web", "a.com", "/", "web", 80);
        if let Some(spec) = ing.spec.as_mut() {
            spec.tls = Some(vec![IngressTLS {
                hosts: Some(vec!["a.com".to_string()]),
                secret_name: Some(secret.to_string()),
            }]);
        }
        ing
    }

    fn keypair_secret(name: &str, host: &str) -> Secret {
        let (cert, key) = generate_self_signed(&[host]).unwrap();
        Secret {
            metadata: meta("default", name),
            data: Some(BTreeMap::from([
                (SECRET_TLS_CERT_KEY.to_string(), ByteString(cert.into_bytes())),
                (SECRET_TLS_KEY_KEY.to_string(), ByteString(key.into_bytes())),
            ])),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_caches_start_unsynced() {
        let (caches, _writers) = Caches::new();
        assert!(!caches.all_synced());

        caches.ingresses.mark_synced();
        caches.services.mark_synced();
        caches.endpoints.mark_synced();
        caches.secrets.mark_synced();
        assert!(!caches.all_synced());

        caches.configmaps.mark_synced();
        assert!(caches.all_synced());
    }

    #[test]
    fn test_applied_ingress_queues_rebuild_and_secrets() {
        let (rebuild, secrets) = queues();
        let router = EventRouter::new(rebuild.clone(), secrets.clone(), Vec::new());

        router.ingress_changed(&tls_ingress("web-tls"), Change::Applied);
        router.ingress_changed(&tls_ingress("web-tls"), Change::Applied);

        assert_eq!(rebuild.len(), 1);
        assert_eq!(secrets.len(), 1);
    }

    #[test]
    fn test_deleted_ingress_only_queues_rebuild() {
        let (rebuild, secrets) = queues();
        let router = EventRouter::new(rebuild.clone(), secrets.clone(), Vec::new());

        router.ingress_changed(&tls_ingress("web-tls"), Change::Deleted);

        assert_eq!(rebuild.len(), 1);
        assert!(secrets.is_empty());
    }

    #[test]
    fn test_service_and_endpoint_changes_queue_rebuild() {
        let (rebuild, secrets) = queues();
        let router = EventRouter::new(rebuild.clone(), secrets.clone(), Vec::new());

        router.service_changed(&service("default", "web", 80, IntOrString::Int(8080)), Change::Applied);
        router.endpoints_changed(&endpoints("default", "web", &["10.0.0.1"], 8080), Change::Deleted);

        assert_eq!(rebuild.len(), 1);
        assert!(secrets.is_empty());
    }

    #[test]
    fn test_only_watched_configmaps_queue_rebuild() {
        let (rebuild, secrets) = queues();
        let router = EventRouter::new(
            rebuild.clone(),
            secrets,
            vec!["ingress/controller-config".to_string()],
        );

        router.configmap_changed(
            &ConfigMap {
                metadata: meta("default", "unrelated"),
                ..Default::default()
            },
            Change::Applied,
        );
        assert!(rebuild.is_empty());

        router.configmap_changed(
            &ConfigMap {
                metadata: meta("ingress", "controller-config"),
                ..Default::default()
            },
            Change::Applied,
        );
        assert_eq!(rebuild.len(), 1);
    }

    #[test]
    fn test_secret_change_queues_secret_key() {
        let (rebuild, secrets) = queues();
        let router = EventRouter::new(rebuild.clone(), secrets.clone(), Vec::new());

        router.secret_changed(&keypair_secret("web-tls", "a.com"), Change::Applied);

        assert!(rebuild.is_empty());
        assert_eq!(secrets.len(), 1);
    }

    #[tokio::test]
    async fn test_process_secret_tracks_referenced_and_forgets_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let (caches, mut writers) = Caches::new();
        writers
            .ingresses
            .apply_watcher_event(&Event::Apply(tls_ingress("web-tls")));
        let secret = keypair_secret("web-tls", "a.com");
        writers.secrets.apply_watcher_event(&Event::Apply(secret.clone()));

        let tracker = Arc::new(CertificateTracker::new());
        let synchronizer = SecretSynchronizer::new(
            caches.secrets.clone(),
            caches.ingresses.clone(),
            tracker.clone(),
            IngressClassFilter::new(None, "nginx"),
            dir.path(),
            None,
        );
        let rebuild = TaskQueue::new("rebuild");

        let action = process_secret(&synchronizer, caches.secrets.as_ref(), &rebuild, "default/web-tls")
            .await
            .unwrap();
        assert_eq!(action, QueueAction::Done);
        assert!(tracker.get("default/web-tls").is_some());
        assert_eq!(rebuild.len(), 1);

        writers.secrets.apply_watcher_event(&Event::Delete(secret));
        let rebuild = TaskQueue::new("rebuild");
        process_secret(&synchronizer, caches.secrets.as_ref(), &rebuild, "default/web-tls")
            .await
            .unwrap();
        assert!(tracker.get("default/web-tls").is_none());
        assert_eq!(rebuild.len(), 1);
    }

    #[tokio::test]
    async fn test_process_unreferenced_secret_is_irrelevant() {
        let dir = tempfile::tempdir().unwrap();
        let (caches, mut writers) = Caches::new();
        writers
            .secrets
            .apply_watcher_event(&Event::Apply(keypair_secret("other", "b.com")));
        let tracker = Arc::new(CertificateTracker::new());
        let synchronizer = SecretSynchronizer::new(
            caches.secrets.clone(),
            caches.ingresses.clone(),
            tracker.clone(),
            IngressClassFilter::new(None, "nginx"),
            dir.path(),
            None,
        );
        let rebuild = TaskQueue::new("rebuild");

        process_secret(&synchronizer, caches.secrets.as_ref(), &rebuild, "default/other")
            .await
            .unwrap();

        assert!(tracker.get("default/other").is_none());
        assert!(rebuild.is_empty());
    }
}
