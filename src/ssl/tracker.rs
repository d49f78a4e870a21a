// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Certificate Tracker: keyed store of loaded TLS material.
//!
//! Many readers (the Builder, annotation parsers) and one writer class (the Secret
//! Synchronizer). Writes are serialized by the lock; records are shared as
//! immutable `Arc`s and replaced wholesale, never mutated in place.

use crate::model::CertificateRecord;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct CertificateTracker {
    records: RwLock<HashMap<String, Arc<CertificateRecord>>>,
}

impl CertificateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record stored under a secret key (`namespace/name`).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<CertificateRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Inserts or replaces a record, returning the previous one.
    pub fn add_or_update(&self, key: &str, record: CertificateRecord) -> Option<Arc<CertificateRecord>> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Arc::new(record))
    }

    /// Removes a record, returning it if it existed.
    pub fn delete(&self, key: &str) -> Option<Arc<CertificateRecord>> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Sorted list of tracked keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, sha: &str) -> CertificateRecord {
        CertificateRecord {
            namespace: "default".to_string(),
            name: name.to_string(),
            pem_sha: sha.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_get_delete() {
        let tracker = CertificateTracker::new();
        assert!(tracker.is_empty());

        assert!(tracker.add_or_update("default/a", record("a", "1")).is_none());
        let previous = tracker.add_or_update("default/a", record("a", "2"));
        assert_eq!(previous.map(|r| r.pem_sha.clone()).as_deref(), Some("1"));
        assert_eq!(
            tracker.get("default/a").map(|r| r.pem_sha.clone()).as_deref(),
            Some("2")
        );

        tracker.add_or_update("default/b", record("b", "3"));
        assert_eq!(tracker.keys(), vec!["default/a", "default/b"]);

        assert!(tracker.delete("default/a").is_some());
        assert!(tracker.get("default/a").is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_readers_and_writer() {
        let tracker = Arc::new(CertificateTracker::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..100 {
                    if i == 0 {
                        tracker.add_or_update("default/hot", record("hot", &j.to_string()));
                    } else {
                        let _ = tracker.get("default/hot");
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            tracker.get("default/hot").map(|r| r.pem_sha.clone()).as_deref(),
            Some("99")
        );
    }
}
