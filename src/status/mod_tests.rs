// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status/mod.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::testing::{cache, ingress, meta, with_annotations, RecordingClusterClient};
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, NodeAddress, NodeStatus, PodSpec, Service,
        ServiceSpec, ServiceStatus,
    };
    use k8s_openapi::api::networking::v1::{IngressLoadBalancerStatus, IngressStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn settings(publish_service: Option<&str>) -> StatusSettings {
        StatusSettings {
            publish_service: publish_service.map(str::to_string),
            pod_name: Some("controller-0".to_string()),
            pod_namespace: Some("ingress".to_string()),
            update_status_on_shutdown: true,
            interval: Duration::from_secs(60),
            class_filter: IngressClassFilter::new(None, "nginx"),
        }
    }

    fn controller_pod(name: &str, node: &str) -> Pod {
        let mut metadata = meta("ingress", name);
        metadata.labels = Some(BTreeMap::from([(
            "app".to_string(),
            "ingress-controller".to_string(),
        )]));
        Pod {
            metadata,
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn node(name: &str, addresses: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(kind, address)| NodeAddress {
                            type_: (*kind).to_string(),
                            address: (*address).to_string(),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        }
    }

    fn publish_service(addresses: &[(&str, &str)]) -> Service {
        Service {
            metadata: meta("ingress", "controller"),
            spec: None,
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(
                        addresses
                            .iter()
                            .map(|(ip, hostname)| LoadBalancerIngress {
                                ip: (!ip.is_empty()).then(|| (*ip).to_string()),
                                hostname: (!hostname.is_empty()).then(|| (*hostname).to_string()),
                                ..Default::default()
                            })
                            .collect(),
                    ),
                }),
                conditions: None,
            }),
        }
    }

    /// Cluster with two managed ingresses and a publish service.
    fn cluster_with_ingresses() -> (Arc<RecordingClusterClient>, Vec<Ingress>) {
        let cluster = Arc::new(RecordingClusterClient::default());
        let ingresses = vec![
            ingress("default", "a", "a.com", "/", "web", 80),
            ingress("default", "b", "b.com", "/", "web", 80),
        ];
        for ing in &ingresses {
            cluster.add_ingress(ing.clone());
        }
        cluster.services.lock().unwrap().insert(
            "ingress/controller".to_string(),
            publish_service(&[("203.0.113.10", ""), ("", "lb.example.com")]),
        );
        (cluster, ingresses)
    }

    fn status_sync(
        cluster: Arc<RecordingClusterClient>,
        ingresses: Vec<Ingress>,
        elector: Arc<dyn LeaderElector>,
        settings: StatusSettings,
    ) -> StatusSync {
        StatusSync::new(cluster, cache(ingresses), elector, settings)
    }

    #[test]
    fn test_same_addresses_ignores_order() {
        let a = vec![to_status("10.0.0.1"), to_status("lb.example.com")];
        let b = vec![to_status("lb.example.com"), to_status("10.0.0.1")];
        assert!(same_addresses(&a, &b));
        assert!(!same_addresses(&a, &b[..1]));
    }

    #[test]
    fn test_to_status_separates_ips_and_hostnames() {
        assert_eq!(to_status("2001:db8::1").ip.as_deref(), Some("2001:db8::1"));
        assert_eq!(to_status("lb.example.com").hostname.as_deref(), Some("lb.example.com"));
        assert!(to_status("lb.example.com").ip.is_none());
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (cluster, ingresses) = cluster_with_ingresses();
        let status = status_sync(
            cluster.clone(),
            ingresses,
            Arc::new(StaticElector::new(true)),
            settings(Some("ingress/controller")),
        );

        assert_eq!(status.sync().await.unwrap(), 2);
        assert_eq!(status.sync().await.unwrap(), 0);
        assert_eq!(cluster.status_writes(), 2);

        let published = cluster.published("default/a");
        assert_eq!(published.len(), 2);
        assert!(published.iter().any(|e| e.ip.as_deref() == Some("203.0.113.10")));
        assert!(published
            .iter()
            .any(|e| e.hostname.as_deref() == Some("lb.example.com")));
    }

    #[tokio::test]
    async fn test_reordered_published_status_is_not_rewritten() {
        let (cluster, mut ingresses) = cluster_with_ingresses();
        ingresses.truncate(1);
        let mut current = ingresses[0].clone();
        current.status = Some(IngressStatus {
            load_balancer: Some(IngressLoadBalancerStatus {
                ingress: Some(vec![to_status("lb.example.com"), to_status("203.0.113.10")]),
            }),
        });
        cluster.add_ingress(current);

        let status = status_sync(
            cluster.clone(),
            ingresses,
            Arc::new(StaticElector::new(true)),
            settings(Some("ingress/controller")),
        );

        assert_eq!(status.sync().await.unwrap(), 0);
        assert_eq!(cluster.status_writes(), 0);
    }

    #[tokio::test]
    async fn test_follower_never_writes() {
        let (cluster, ingresses) = cluster_with_ingresses();
        let status = status_sync(
            cluster.clone(),
            ingresses,
            Arc::new(StaticElector::new(false)),
            settings(Some("ingress/controller")),
        );

        assert_eq!(status.sync().await.unwrap(), 0);
        assert_eq!(cluster.status_writes(), 0);
    }

    #[tokio::test]
    async fn test_unmanaged_ingress_is_left_alone() {
        let cluster = Arc::new(RecordingClusterClient::default());
        let other = with_annotations(
            ingress("default", "other", "o.com", "/", "web", 80),
            &[("kubernetes.io/ingress.class", "traefik")],
        );
        cluster.add_ingress(other.clone());
        cluster.services.lock().unwrap().insert(
            "ingress/controller".to_string(),
            publish_service(&[("203.0.113.10", "")]),
        );
        let status = status_sync(
            cluster.clone(),
            vec![other],
            Arc::new(StaticElector::new(true)),
            settings(Some("ingress/controller")),
        );

        assert_eq!(status.sync().await.unwrap(), 0);
        assert!(cluster.published("default/other").is_empty());
    }

    #[tokio::test]
    async fn test_node_addresses_without_publish_service() {
        let cluster = Arc::new(RecordingClusterClient::default());
        {
            let mut pods = cluster.pods.lock().unwrap();
            pods.push(controller_pod("controller-0", "node-a"));
            pods.push(controller_pod("controller-1", "node-b"));
            let mut terminating = controller_pod("controller-2", "node-c");
            terminating.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            pods.push(terminating);
        }
        {
            let mut nodes = cluster.nodes.lock().unwrap();
            nodes.insert(
                "node-a".to_string(),
                node("node-a", &[("InternalIP", "10.1.0.1"), ("ExternalIP", "198.51.100.1")]),
            );
            nodes.insert("node-b".to_string(), node("node-b", &[("InternalIP", "10.1.0.2")]));
            nodes.insert(
                "node-c".to_string(),
                node("node-c", &[("ExternalIP", "198.51.100.3")]),
            );
        }
        let status = status_sync(
            cluster,
            Vec::new(),
            Arc::new(StaticElector::new(true)),
            settings(None),
        );

        let addresses = status.running_addresses().await.unwrap();
        let ips: Vec<_> = addresses.iter().filter_map(|e| e.ip.as_deref()).collect();
        assert_eq!(ips, vec!["10.1.0.2", "198.51.100.1"]);
    }

    #[tokio::test]
    async fn test_missing_publish_service_keeps_published_status() {
        let cluster = Arc::new(RecordingClusterClient::default());
        let mut published = ingress("default", "a", "a.com", "/", "web", 80);
        published.status = Some(IngressStatus {
            load_balancer: Some(IngressLoadBalancerStatus {
                ingress: Some(vec![to_status("203.0.113.10")]),
            }),
        });
        cluster.add_ingress(published.clone());
        let status = status_sync(
            cluster.clone(),
            vec![published],
            Arc::new(StaticElector::new(true)),
            settings(Some("ingress/missing")),
        );

        assert!(status.running_addresses().await.is_err());
        assert!(status.sync().await.is_err());
        assert_eq!(cluster.status_writes(), 0);
        assert_eq!(cluster.published("default/a"), vec![to_status("203.0.113.10")]);
    }

    #[tokio::test]
    async fn test_publish_service_external_ips_are_published() {
        let cluster = Arc::new(RecordingClusterClient::default());
        let mut svc = publish_service(&[("203.0.113.10", "")]);
        svc.spec = Some(ServiceSpec {
            external_ips: Some(vec!["198.51.100.7".to_string()]),
            ..Default::default()
        });
        cluster
            .services
            .lock()
            .unwrap()
            .insert("ingress/controller".to_string(), svc);
        let status = status_sync(
            cluster,
            Vec::new(),
            Arc::new(StaticElector::new(true)),
            settings(Some("ingress/controller")),
        );

        let ips: Vec<_> = status
            .running_addresses()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|a| a.ip)
            .collect();
        assert_eq!(ips, vec!["198.51.100.7", "203.0.113.10"]);
    }

    #[tokio::test]
    async fn test_external_name_publish_service_publishes_its_name() {
        let cluster = Arc::new(RecordingClusterClient::default());
        let mut svc = publish_service(&[("203.0.113.10", "")]);
        svc.spec = Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some("ingress.example.net".to_string()),
            ..Default::default()
        });
        cluster
            .services
            .lock()
            .unwrap()
            .insert("ingress/controller".to_string(), svc);
        let status = status_sync(
            cluster,
            Vec::new(),
            Arc::new(StaticElector::new(true)),
            settings(Some("ingress/controller")),
        );

        let addresses = status.running_addresses().await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].hostname.as_deref(), Some("ingress.example.net"));
        assert_eq!(addresses[0].ip, None);
    }

    #[tokio::test]
    async fn test_shutdown_clears_status_as_single_replica() {
        let (cluster, ingresses) = cluster_with_ingresses();
        cluster
            .pods
            .lock()
            .unwrap()
            .push(controller_pod("controller-0", "node-a"));
        let status = status_sync(
            cluster.clone(),
            ingresses,
            Arc::new(StaticElector::new(true)),
            settings(Some("ingress/controller")),
        );
        status.sync().await.unwrap();

        assert_eq!(status.shutdown().await.unwrap(), 2);
        assert!(cluster.published("default/a").is_empty());
        assert!(cluster.published("default/b").is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_keeps_status_with_other_replicas() {
        let (cluster, ingresses) = cluster_with_ingresses();
        {
            let mut pods = cluster.pods.lock().unwrap();
            pods.push(controller_pod("controller-0", "node-a"));
            pods.push(controller_pod("controller-1", "node-b"));
        }
        let status = status_sync(
            cluster.clone(),
            ingresses,
            Arc::new(StaticElector::new(true)),
            settings(Some("ingress/controller")),
        );
        status.sync().await.unwrap();

        assert_eq!(status.shutdown().await.unwrap(), 0);
        assert_eq!(cluster.published("default/a").len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_respects_setting() {
        let (cluster, ingresses) = cluster_with_ingresses();
        cluster
            .pods
            .lock()
            .unwrap()
            .push(controller_pod("controller-0", "node-a"));
        let mut settings = settings(Some("ingress/controller"));
        settings.update_status_on_shutdown = false;
        let status = status_sync(
            cluster.clone(),
            ingresses,
            Arc::new(StaticElector::new(true)),
            settings,
        );
        status.sync().await.unwrap();

        assert_eq!(status.shutdown().await.unwrap(), 0);
        assert_eq!(cluster.published("default/a").len(), 2);
    }

    #[tokio::test]
    async fn test_run_publishes_on_leadership_and_stops_on_shutdown() {
        let (cluster, ingresses) = cluster_with_ingresses();
        let elector = Arc::new(StaticElector::new(false));
        let mut settings = settings(Some("ingress/controller"));
        settings.update_status_on_shutdown = false;
        let status = Arc::new(status_sync(cluster.clone(), ingresses, elector.clone(), settings));
        let (stop, stopped) = watch::channel(false);

        let handle = tokio::spawn(status.clone().run("controller-0".to_string(), stopped));
        elector.set_leader(true);
        status.kick();

        for _ in 0..100 {
            if cluster.status_writes() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cluster.status_writes(), 2);

        stop.send(true).unwrap();
        handle.await.unwrap();
    }
}
