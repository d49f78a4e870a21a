// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Basic and digest authentication backed by an htpasswd-style secret.
//!
//! The secret's `auth` key is written to `{auth_dir}/{namespace}-{ingress}.passwd`
//! so the proxy can read it.

use super::parser::{get_string, secret_key, AnnotationError};
use super::{AnnotationValue, ParseContext};
use crate::constants::SECRET_AUTH_KEY;
use crate::labels::{AUTH_REALM, AUTH_SECRET, AUTH_TYPE};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Authentication settings of a Location.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicDigest {
    /// `basic` or `digest`
    pub auth_type: String,
    pub realm: String,
    /// Path of the generated credentials file
    pub file: String,
    pub secured: bool,
}

pub(super) fn parse(ing: &Ingress, ctx: &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError> {
    let auth_type = get_string(ing, AUTH_TYPE)?;
    if auth_type != "basic" && auth_type != "digest" {
        return Err(AnnotationError::denied(format!(
            "invalid authentication type '{auth_type}'"
        )));
    }

    let secret_name = get_string(ing, AUTH_SECRET)
        .map_err(|_| AnnotationError::denied("authentication secret name is missing"))?;
    let key = secret_key(ing, &secret_name);
    let secret = ctx
        .secrets
        .get_by_key(&key)
        .ok_or_else(|| AnnotationError::denied(format!("authentication secret '{key}' not found")))?;

    let content = secret
        .data
        .as_ref()
        .and_then(|data| data.get(SECRET_AUTH_KEY))
        .ok_or_else(|| {
            AnnotationError::denied(format!("secret '{key}' does not contain the auth key"))
        })?;

    let realm = get_string(ing, AUTH_REALM).unwrap_or_default();
    let file = passwd_path(
        ctx.auth_dir,
        ing.metadata.namespace.as_deref().unwrap_or_default(),
        ing.metadata.name.as_deref().unwrap_or_default(),
    );
    std::fs::write(&file, &content.0).map_err(|e| {
        AnnotationError::denied(format!("failed to write {}: {e}", file.display()))
    })?;

    Ok(AnnotationValue::BasicDigestAuth(BasicDigest {
        auth_type,
        realm,
        file: file.to_string_lossy().into_owned(),
        secured: true,
    }))
}

fn passwd_path(auth_dir: &Path, namespace: &str, name: &str) -> std::path::PathBuf {
    auth_dir.join(format!("{namespace}-{name}.passwd"))
}
