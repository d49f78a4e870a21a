// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Client certificate authentication against a CA held in a tracked secret.

use super::parser::{get_string, get_u32_or, secret_key, AnnotationError};
use super::{AnnotationValue, ParseContext};
use crate::labels::{AUTH_TLS_SECRET, AUTH_TLS_VERIFY_DEPTH};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

/// Default client certificate chain depth
const DEFAULT_VERIFY_DEPTH: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuth {
    /// Secret key (`namespace/name`)
    pub secret: String,
    pub ca_file_name: String,
    pub pem_sha: String,
    pub validation_depth: u32,
}

pub(super) fn parse(ing: &Ingress, ctx: &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError> {
    let reference = get_string(ing, AUTH_TLS_SECRET)?;
    let key = secret_key(ing, &reference);

    let depth = get_u32_or(ing, AUTH_TLS_VERIFY_DEPTH, DEFAULT_VERIFY_DEPTH);
    if depth == 0 {
        return Err(AnnotationError::denied("auth-tls-verify-depth must be positive"));
    }

    let record = ctx.certificates.get(&key).ok_or_else(|| {
        AnnotationError::denied(format!("certificate authority '{key}' not found"))
    })?;
    let ca_file_name = record.ca_file_name.clone().ok_or_else(|| {
        AnnotationError::denied(format!("secret '{key}' does not contain a CA bundle"))
    })?;

    Ok(AnnotationValue::CertificateAuth(CertificateAuth {
        secret: key,
        ca_file_name,
        pem_sha: record.pem_sha.clone(),
        validation_depth: depth,
    }))
}
