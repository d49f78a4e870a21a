// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Proxy timeouts and buffer sizes, each falling back to the backend defaults.

use super::parser::{get_string_or, get_u32_or, AnnotationError};
use super::{AnnotationValue, ParseContext};
use crate::labels::{
    PROXY_BODY_SIZE, PROXY_BUFFER_SIZE, PROXY_CONNECT_TIMEOUT, PROXY_COOKIE_DOMAIN,
    PROXY_COOKIE_PATH, PROXY_NEXT_UPSTREAM, PROXY_READ_TIMEOUT, PROXY_SEND_TIMEOUT,
};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub body_size: String,
    pub connect_timeout: u32,
    pub send_timeout: u32,
    pub read_timeout: u32,
    pub buffer_size: String,
    pub cookie_domain: String,
    pub cookie_path: String,
    pub next_upstream: String,
}

pub(super) fn parse(ing: &Ingress, ctx: &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError> {
    let d = ctx.defaults;
    Ok(AnnotationValue::Proxy(ProxyConfig {
        body_size: get_string_or(ing, PROXY_BODY_SIZE, &d.proxy_body_size),
        connect_timeout: get_u32_or(ing, PROXY_CONNECT_TIMEOUT, d.proxy_connect_timeout),
        send_timeout: get_u32_or(ing, PROXY_SEND_TIMEOUT, d.proxy_send_timeout),
        read_timeout: get_u32_or(ing, PROXY_READ_TIMEOUT, d.proxy_read_timeout),
        buffer_size: get_string_or(ing, PROXY_BUFFER_SIZE, &d.proxy_buffer_size),
        cookie_domain: get_string_or(ing, PROXY_COOKIE_DOMAIN, &d.proxy_cookie_domain),
        cookie_path: get_string_or(ing, PROXY_COOKIE_PATH, &d.proxy_cookie_path),
        next_upstream: get_string_or(ing, PROXY_NEXT_UPSTREAM, &d.proxy_next_upstream),
    }))
}
