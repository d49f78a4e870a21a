// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! External authentication: every request is first sent to `auth-url`.

use super::parser::{get_bool_or, get_string, split_list, AnnotationError};
use super::{AnnotationValue, ParseContext};
use crate::labels::{AUTH_METHOD, AUTH_RESPONSE_HEADERS, AUTH_SEND_BODY, AUTH_URL};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

const VALID_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS", "TRACE",
];

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAuth {
    pub url: String,
    /// Host of `url`, used for the upstream `Host` header
    pub host: String,
    /// Empty means the proxy's default method
    pub method: String,
    pub send_body: bool,
    /// Headers copied from the auth response to the upstream request
    pub response_headers: Vec<String>,
}

pub(super) fn parse(ing: &Ingress, _ctx: &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError> {
    let raw_url = get_string(ing, AUTH_URL)?;
    let url = url::Url::parse(&raw_url)
        .map_err(|e| AnnotationError::denied(format!("invalid auth-url '{raw_url}': {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AnnotationError::denied(format!(
            "auth-url '{raw_url}' must use http or https"
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| AnnotationError::denied(format!("auth-url '{raw_url}' has no host")))?
        .to_string();

    let method = get_string(ing, AUTH_METHOD)
        .map(|m| m.to_ascii_uppercase())
        .unwrap_or_default();
    if !method.is_empty() && !VALID_METHODS.contains(&method.as_str()) {
        return Err(AnnotationError::denied(format!(
            "invalid auth-method '{method}'"
        )));
    }

    let response_headers = get_string(ing, AUTH_RESPONSE_HEADERS)
        .map(|raw| split_list(&raw))
        .unwrap_or_default();
    if let Some(bad) = response_headers
        .iter()
        .find(|h| !h.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
    {
        return Err(AnnotationError::denied(format!(
            "invalid auth-response-headers entry '{bad}'"
        )));
    }

    Ok(AnnotationValue::ExternalAuth(ExternalAuth {
        url: raw_url,
        host,
        method,
        send_body: get_bool_or(ing, AUTH_SEND_BODY, false),
        response_headers,
    }))
}
