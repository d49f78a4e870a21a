// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Integration tests for live cluster access
//!
//! These tests talk to the API server of the current kube context and are skipped
//! when none is reachable.
//!
//! Run with: cargo test --test cluster_integration -- --ignored

mod common;

use common::get_kube_client_or_skip;
use ingress_core::cluster::{ClusterClient, KubeClusterClient};
use ingress_core::status::{LeaderElector, LeaseElector, LeaseSettings};
use std::time::Duration;

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_missing_objects_are_reported_as_none() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    let cluster = KubeClusterClient::new(client);

    let ingress = cluster
        .get_ingress("default", "ingress-core-does-not-exist")
        .await
        .expect("ingress lookup");
    assert!(ingress.is_none());

    let service = cluster
        .get_service("default", "ingress-core-does-not-exist")
        .await
        .expect("service lookup");
    assert!(service.is_none());
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_list_pods_with_selector() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    let cluster = KubeClusterClient::new(client);

    let pods = cluster
        .list_pods("kube-system", "ingress-core-test=absent")
        .await
        .expect("pod listing");
    assert!(pods.is_empty());
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_single_candidate_acquires_and_releases_lease() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    let settings = LeaseSettings::new("ingress-core-test-lease", "default", "integration-test");
    let elector = LeaseElector::start(client, settings)
        .await
        .expect("lease manager");

    let mut state = elector.subscribe();
    let acquired = tokio::time::timeout(Duration::from_secs(30), async {
        while !*state.borrow_and_update() {
            if state.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(acquired.is_ok(), "lease should be acquired within 30s");
    assert!(elector.is_leader());

    drop(state);
    elector.release().await;
}
