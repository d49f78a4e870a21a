// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `store.rs`

use super::*;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::watcher::Event;

fn service(namespace: &str, name: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_split_key() {
    assert_eq!(split_key("default/web"), (Some("default"), "web"));
    assert_eq!(split_key("node-1"), (None, "node-1"));
}

#[test]
fn test_object_key() {
    assert_eq!(object_key(&service("prod", "api")), "prod/api");
}

#[test]
fn test_cache_get_by_key_and_list() {
    let (reader, mut writer) = kube::runtime::reflector::store::<Service>();
    writer.apply_watcher_event(&Event::Apply(service("default", "web")));
    writer.apply_watcher_event(&Event::Apply(service("other", "web")));

    let cache = Cache::new(reader);

    let found = cache.get_by_key("other/web");
    assert!(found.is_some());
    assert_eq!(
        found.and_then(|s| s.metadata.namespace.clone()).as_deref(),
        Some("other")
    );
    assert!(cache.get_by_key("default/missing").is_none());
    assert_eq!(cache.list().len(), 2);
}

#[test]
fn test_cache_sync_flag() {
    let (reader, _writer) = kube::runtime::reflector::store::<Service>();
    let cache = Cache::new(reader);
    let clone = cache.clone();

    assert!(!cache.has_synced());
    clone.mark_synced();
    assert!(cache.has_synced(), "sync flag is shared between clones");
}
