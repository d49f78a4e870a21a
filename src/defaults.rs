// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Baseline feature values used when a rule carries no overriding annotation.
//!
//! Backend adapters supply [`BackendDefaults`] through `backend_defaults()`. The
//! controller-wide overrides `ConfigMap` is merged on top, key by key, using the
//! kebab-case field names (`proxy-connect-timeout`, `limit-rate`, ...).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Defaults every backend must provide for annotation-driven features.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BackendDefaults {
    /// Path to redirect `/` to when the application is not served at the root
    pub app_root: String,
    /// HTTP codes intercepted by the proxy's error pages
    pub custom_http_errors: Vec<u16>,
    pub proxy_body_size: String,
    /// Seconds
    pub proxy_connect_timeout: u32,
    /// Seconds
    pub proxy_read_timeout: u32,
    /// Seconds
    pub proxy_send_timeout: u32,
    pub proxy_buffer_size: String,
    pub proxy_cookie_path: String,
    pub proxy_cookie_domain: String,
    pub proxy_next_upstream: String,
    /// URLs excluded from access logs
    pub skip_access_log_urls: Vec<String>,
    pub ssl_redirect: bool,
    pub force_ssl_redirect: bool,
    pub use_port_in_redirects: bool,
    /// 0 defers to the platform liveness probe
    pub upstream_max_fails: u32,
    /// Seconds; 0 defers to the platform liveness probe
    pub upstream_fail_timeout: u32,
    pub whitelist_source_range: Vec<String>,
    /// Bytes per second; 0 disables
    pub limit_rate: u32,
    pub limit_rate_after: u32,
}

impl Default for BackendDefaults {
    fn default() -> Self {
        Self {
            app_root: String::new(),
            custom_http_errors: Vec::new(),
            proxy_body_size: "1m".to_string(),
            proxy_connect_timeout: 5,
            proxy_read_timeout: 60,
            proxy_send_timeout: 60,
            proxy_buffer_size: "4k".to_string(),
            proxy_cookie_path: "off".to_string(),
            proxy_cookie_domain: "off".to_string(),
            proxy_next_upstream: "error timeout invalid_header http_502 http_503 http_504"
                .to_string(),
            skip_access_log_urls: Vec::new(),
            ssl_redirect: true,
            force_ssl_redirect: false,
            use_port_in_redirects: false,
            upstream_max_fails: 0,
            upstream_fail_timeout: 0,
            whitelist_source_range: Vec::new(),
            limit_rate: 0,
            limit_rate_after: 0,
        }
    }
}

impl BackendDefaults {
    /// Returns a copy with the overrides `ConfigMap` data merged on top.
    ///
    /// Unknown keys belong to the backend and are ignored here. Values that do not
    /// parse as the field's type are logged and ignored.
    #[must_use]
    pub fn merge_overrides(&self, overrides: &BTreeMap<String, String>) -> Self {
        let Ok(Value::Object(mut fields)) = serde_json::to_value(self) else {
            return self.clone();
        };

        for (key, raw) in overrides {
            let Some(current) = fields.get(key) else {
                debug!(key = %key, "Override key is not a backend default, ignoring");
                continue;
            };
            match coerce(current, raw, NUMERIC_LIST_KEYS.contains(&key.as_str())) {
                Some(value) => {
                    fields.insert(key.clone(), value);
                }
                None => warn!(key = %key, value = %raw, "Invalid override value, ignoring"),
            }
        }

        match serde_json::from_value(Value::Object(fields)) {
            Ok(merged) => merged,
            Err(e) => {
                warn!(error = %e, "Failed to apply overrides, keeping defaults");
                self.clone()
            }
        }
    }
}

/// List fields holding numbers rather than strings
const NUMERIC_LIST_KEYS: [&str; 1] = ["custom-http-errors"];

/// Converts a `ConfigMap` string into the JSON shape of the field it overrides.
fn coerce(current: &Value, raw: &str, numeric_list: bool) -> Option<Value> {
    let raw = raw.trim();
    match current {
        Value::Bool(_) => raw.parse::<bool>().ok().map(Value::Bool),
        Value::Number(_) => raw.parse::<u32>().ok().map(Value::from),
        Value::String(_) => Some(Value::String(raw.to_string())),
        Value::Array(_) => {
            let items: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            if numeric_list {
                items
                    .iter()
                    .map(|s| s.parse::<u16>().ok().map(Value::from))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Array)
            } else {
                Some(Value::Array(
                    items.into_iter().map(|s| Value::String(s.to_string())).collect(),
                ))
            }
        }
        _ => None,
    }
}
