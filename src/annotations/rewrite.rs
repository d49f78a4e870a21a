// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Path rewriting and HTTPS redirection.

use super::parser::{get_bool_or, get_string_or, AnnotationError};
use super::{AnnotationValue, ParseContext};
use crate::labels::{ADD_BASE_URL, FORCE_SSL_REDIRECT, REWRITE_TARGET, SSL_REDIRECT};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rewrite {
    /// URI the matched path is rewritten to; empty keeps the request path
    pub target: String,
    /// Inject a `<base>` tag into HTML responses
    pub add_base_url: bool,
    pub ssl_redirect: bool,
    pub force_ssl_redirect: bool,
    /// Path `/` is redirected to
    pub app_root: String,
}

pub(super) fn parse(ing: &Ingress, ctx: &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError> {
    let d = ctx.defaults;
    Ok(AnnotationValue::Rewrite(Rewrite {
        target: get_string_or(ing, REWRITE_TARGET, ""),
        add_base_url: get_bool_or(ing, ADD_BASE_URL, false),
        ssl_redirect: get_bool_or(ing, SSL_REDIRECT, d.ssl_redirect),
        force_ssl_redirect: get_bool_or(ing, FORCE_SSL_REDIRECT, d.force_ssl_redirect),
        app_root: d.app_root.clone(),
    }))
}
