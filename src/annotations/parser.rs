// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed accessors for `Ingress` annotations and the parser error taxonomy.

use k8s_openapi::api::networking::v1::Ingress;
use std::net::IpAddr;
use thiserror::Error;

/// Outcome of a parser that did not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    /// The feature's annotations are absent; the parser is skipped silently
    #[error("annotation is missing")]
    Missing,

    /// The rule must not be served; recorded under the `Denied` key
    #[error("{reason}")]
    Denied {
        /// Why the rule was denied
        reason: String,
    },

    /// The annotation value is malformed; logged and skipped
    #[error("invalid value for annotation '{annotation}': {reason}")]
    Invalid {
        /// Full annotation key
        annotation: String,
        /// Why the value was rejected
        reason: String,
    },
}

impl AnnotationError {
    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(annotation: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            annotation: annotation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Returns the raw annotation value, `Missing` when absent or blank.
pub fn get_string(ing: &Ingress, key: &str) -> Result<String, AnnotationError> {
    ing.metadata
        .annotations
        .as_ref()
        .and_then(|anns| anns.get(key))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .ok_or(AnnotationError::Missing)
}

/// Parses a boolean annotation (`true`/`false`, case-insensitive).
pub fn get_bool(ing: &Ingress, key: &str) -> Result<bool, AnnotationError> {
    let raw = get_string(ing, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(AnnotationError::invalid(key, format!("'{raw}' is not a boolean"))),
    }
}

/// Parses an integer annotation.
pub fn get_int(ing: &Ingress, key: &str) -> Result<i64, AnnotationError> {
    let raw = get_string(ing, key)?;
    raw.parse::<i64>()
        .map_err(|_| AnnotationError::invalid(key, format!("'{raw}' is not an integer")))
}

/// Parses a non-negative integer annotation, falling back to `default` when absent
/// or malformed.
pub fn get_u32_or(ing: &Ingress, key: &str, default: u32) -> u32 {
    get_int(ing, key)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

/// Parses a string annotation, falling back to `default` when absent.
pub fn get_string_or(ing: &Ingress, key: &str, default: &str) -> String {
    get_string(ing, key).unwrap_or_else(|_| default.to_string())
}

/// Parses a boolean annotation, falling back to `default` when absent or malformed.
pub fn get_bool_or(ing: &Ingress, key: &str, default: bool) -> bool {
    get_bool(ing, key).unwrap_or(default)
}

/// Splits a comma separated list, dropping blanks.
#[must_use]
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Validates a comma separated list of CIDRs (or bare addresses), returning them sorted.
///
/// # Errors
///
/// Returns the first entry that is not a valid address or prefix.
pub fn parse_cidrs(raw: &str) -> Result<Vec<String>, String> {
    let mut cidrs = Vec::new();
    for entry in split_list(raw) {
        if !is_valid_cidr(&entry) {
            return Err(format!("'{entry}' is not a valid CIDR"));
        }
        cidrs.push(entry);
    }
    cidrs.sort();
    cidrs.dedup();
    Ok(cidrs)
}

fn is_valid_cidr(entry: &str) -> bool {
    let (addr, prefix) = match entry.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (entry, None),
    };
    let Ok(ip) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max = if ip.is_ipv4() { 32 } else { 128 };
    match prefix {
        None => true,
        Some(p) => p.parse::<u8>().is_ok_and(|bits| bits <= max),
    }
}

/// Resolves a secret reference written as `name` or `namespace/name`.
#[must_use]
pub fn secret_key(ing: &Ingress, reference: &str) -> String {
    if reference.contains('/') {
        reference.to_string()
    } else {
        format!(
            "{}/{}",
            ing.metadata.namespace.as_deref().unwrap_or_default(),
            reference
        )
    }
}
