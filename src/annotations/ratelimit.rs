// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Connection and request rate limits.
//!
//! Each limit becomes a shared zone named after the ingress. Bursts are five times
//! the configured rate.

use super::parser::{get_int, get_string, parse_cidrs, AnnotationError};
use super::{AnnotationValue, ParseContext};
use crate::labels::{
    LIMIT_CONNECTIONS, LIMIT_RATE, LIMIT_RATE_AFTER, LIMIT_RPM, LIMIT_RPS, LIMIT_WHITELIST,
};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

/// Burst multiplier applied to every limit
const BURST_MULTIPLIER: u32 = 5;

/// Shared memory size (MB) of each zone
const SHARED_SIZE: u32 = 5;

/// One rate limiting zone. A zero `limit` disables it.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub name: String,
    pub limit: u32,
    pub burst: u32,
    pub shared_size: u32,
}

impl Zone {
    fn new(name: String, limit: u32) -> Self {
        if limit == 0 {
            return Self::default();
        }
        Self {
            name,
            limit,
            burst: limit * BURST_MULTIPLIER,
            shared_size: SHARED_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub connections: Zone,
    pub rps: Zone,
    pub rpm: Zone,
    /// Bytes per second per connection
    pub limit_rate: u32,
    pub limit_rate_after: u32,
    /// Zone name prefix (`{namespace}_{ingress}`)
    pub name: String,
    /// CIDRs exempt from the limits
    pub whitelist: Vec<String>,
}

fn limit(ing: &Ingress, key: &str) -> u32 {
    get_int(ing, key)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

pub(super) fn parse(ing: &Ingress, ctx: &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError> {
    let limit_rate = get_int(ing, LIMIT_RATE)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(ctx.defaults.limit_rate);
    let limit_rate_after = get_int(ing, LIMIT_RATE_AFTER)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(ctx.defaults.limit_rate_after);

    let rpm = limit(ing, LIMIT_RPM);
    let rps = limit(ing, LIMIT_RPS);
    let connections = limit(ing, LIMIT_CONNECTIONS);

    let whitelist = match get_string(ing, LIMIT_WHITELIST) {
        Ok(raw) => parse_cidrs(&raw).map_err(AnnotationError::denied)?,
        Err(_) => Vec::new(),
    };

    if rpm == 0 && rps == 0 && connections == 0 {
        return Ok(AnnotationValue::RateLimit(RateLimit {
            limit_rate,
            limit_rate_after,
            ..Default::default()
        }));
    }

    let zone = format!(
        "{}_{}",
        ing.metadata.namespace.as_deref().unwrap_or_default(),
        ing.metadata.name.as_deref().unwrap_or_default()
    );

    Ok(AnnotationValue::RateLimit(RateLimit {
        connections: Zone::new(format!("{zone}_conn"), connections),
        rps: Zone::new(format!("{zone}_rps"), rps),
        rpm: Zone::new(format!("{zone}_rpm"), rpm),
        limit_rate,
        limit_rate_after,
        name: zone,
        whitelist,
    }))
}
