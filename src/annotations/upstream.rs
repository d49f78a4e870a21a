// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotations that change how upstreams are built rather than how a Location behaves.

use super::parser::{get_bool, get_bool_or, get_string, get_u32_or, secret_key, AnnotationError};
use super::{AnnotationValue, ParseContext};
use crate::labels::{
    SECURE_BACKENDS, SECURE_VERIFY_CA_SECRET, SERVICE_UPSTREAM, SSL_PASSTHROUGH,
    UPSTREAM_FAIL_TIMEOUT, UPSTREAM_MAX_FAILS,
};
use crate::model::SecureCaCert;
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

/// TLS towards the upstream.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureUpstream {
    pub secure: bool,
    pub ca_cert: Option<SecureCaCert>,
}

/// Passive health checking parameters applied to every endpoint of a Backend.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub max_fails: u32,
    pub fail_timeout: u32,
}

pub(super) fn parse_secure_upstream(
    ing: &Ingress,
    ctx: &ParseContext<'_>,
) -> Result<AnnotationValue, AnnotationError> {
    let secure = get_bool_or(ing, SECURE_BACKENDS, false);

    let ca_cert = match get_string(ing, SECURE_VERIFY_CA_SECRET) {
        Ok(reference) => {
            let key = secret_key(ing, &reference);
            let record = ctx.certificates.get(&key).ok_or_else(|| {
                AnnotationError::denied(format!("upstream CA secret '{key}' not found"))
            })?;
            let ca_file_name = record.ca_file_name.clone().ok_or_else(|| {
                AnnotationError::denied(format!("secret '{key}' does not contain a CA bundle"))
            })?;
            Some(SecureCaCert {
                secret: key,
                ca_file_name,
                pem_sha: record.pem_sha.clone(),
            })
        }
        Err(_) => None,
    };

    if !secure && ca_cert.is_none() {
        return Err(AnnotationError::Missing);
    }
    Ok(AnnotationValue::SecureUpstream(SecureUpstream { secure, ca_cert }))
}

pub(super) fn parse_health_check(
    ing: &Ingress,
    ctx: &ParseContext<'_>,
) -> Result<AnnotationValue, AnnotationError> {
    Ok(AnnotationValue::HealthCheck(HealthCheck {
        max_fails: get_u32_or(ing, UPSTREAM_MAX_FAILS, ctx.defaults.upstream_max_fails),
        fail_timeout: get_u32_or(ing, UPSTREAM_FAIL_TIMEOUT, ctx.defaults.upstream_fail_timeout),
    }))
}

pub(super) fn parse_service_upstream(
    ing: &Ingress,
    _ctx: &ParseContext<'_>,
) -> Result<AnnotationValue, AnnotationError> {
    get_bool(ing, SERVICE_UPSTREAM).map(AnnotationValue::ServiceUpstream)
}

pub(super) fn parse_ssl_passthrough(
    ing: &Ingress,
    _ctx: &ParseContext<'_>,
) -> Result<AnnotationValue, AnnotationError> {
    get_bool(ing, SSL_PASSTHROUGH).map(AnnotationValue::SslPassthrough)
}
