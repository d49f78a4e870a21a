// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Read-only cache contract over reflector stores.
//!
//! The reconciliation core never owns watch lifecycles. It consumes caches through
//! [`ObjectCache`]: keyed lookup (`namespace/name`), a full listing, and an
//! initial-sync flag. [`Cache`] implements the contract on top of a
//! `kube::runtime::reflector::Store`; the bootstrap marks it synced once the
//! watcher reports `InitDone`.

use kube::runtime::reflector::{ObjectRef, Store};
use kube::Resource;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Keyed read access to a cluster object cache.
pub trait ObjectCache<K>: Send + Sync {
    /// Returns the object stored under `namespace/name` (or `name` when cluster-scoped).
    fn get_by_key(&self, key: &str) -> Option<Arc<K>>;

    /// Returns every cached object.
    fn list(&self) -> Vec<Arc<K>>;

    /// Returns true once the initial listing has been delivered.
    fn has_synced(&self) -> bool;
}

/// Splits a `namespace/name` key. A key without `/` is treated as cluster-scoped.
#[must_use]
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, key),
    }
}

/// Builds a `namespace/name` key.
#[must_use]
pub fn make_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Returns the `namespace/name` key of a cluster object.
#[must_use]
pub fn object_key<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    make_key(
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

/// Reflector-backed cache.
#[derive(Clone)]
pub struct Cache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K> Cache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    /// Wraps a reflector store. The cache reports unsynced until [`Cache::mark_synced`].
    #[must_use]
    pub fn new(store: Store<K>) -> Self {
        Self {
            store,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks the initial listing as delivered.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }

    /// Underlying reflector store.
    #[must_use]
    pub fn store(&self) -> &Store<K> {
        &self.store
    }
}

impl<K> ObjectCache<K> for Cache<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    fn get_by_key(&self, key: &str) -> Option<Arc<K>> {
        let (namespace, name) = split_key(key);
        let obj_ref = match namespace {
            Some(ns) => ObjectRef::new(name).within(ns),
            None => ObjectRef::new(name),
        };
        self.store.get(&obj_ref)
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
