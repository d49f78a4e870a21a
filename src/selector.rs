// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Secret → Ingress reference matching.
//!
//! The Secret Synchronizer only persists secrets some managed `Ingress` references,
//! and Ingress events fan out to the secrets they reference. Both directions are
//! answered from the in-memory Ingress cache.
//!
//! # References
//!
//! An `Ingress` references a secret through:
//! - `spec.tls[].secretName` (resolved in the Ingress namespace)
//! - the `auth-tls-secret` annotation (client certificate CA)
//! - the `secure-verify-ca-secret` annotation (upstream CA)

use crate::annotations::parser::{get_string, secret_key};
use crate::annotations::IngressClassFilter;
use crate::labels::{AUTH_TLS_SECRET, SECURE_VERIFY_CA_SECRET};
use crate::store::{make_key, ObjectCache};
use k8s_openapi::api::networking::v1::Ingress;
use std::sync::Arc;

/// Returns the keys (`namespace/name`) of every TLS-bearing secret `ing` references.
#[must_use]
pub fn referenced_secrets(ing: &Ingress) -> Vec<String> {
    let namespace = ing.metadata.namespace.as_deref().unwrap_or_default();
    let mut keys: Vec<String> = ing
        .spec
        .as_ref()
        .and_then(|spec| spec.tls.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|tls| tls.secret_name.as_deref())
        .filter(|name| !name.is_empty())
        .map(|name| make_key(namespace, name))
        .collect();

    for annotation in [AUTH_TLS_SECRET, SECURE_VERIFY_CA_SECRET] {
        if let Ok(reference) = get_string(ing, annotation) {
            keys.push(secret_key(ing, &reference));
        }
    }

    keys.sort();
    keys.dedup();
    keys
}

/// Finds every managed `Ingress` in the cache that references `secret_key`.
#[must_use]
pub fn find_ingresses_for_secret(
    ingresses: &dyn ObjectCache<Ingress>,
    class_filter: &IngressClassFilter,
    secret_key: &str,
) -> Vec<Arc<Ingress>> {
    ingresses
        .list()
        .into_iter()
        .filter(|ing| class_filter.is_managed(ing))
        .filter(|ing| referenced_secrets(ing).iter().any(|k| k == secret_key))
        .collect()
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod selector_tests;
