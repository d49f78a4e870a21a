// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Source address whitelist.

use super::parser::{get_string, parse_cidrs, AnnotationError};
use super::{AnnotationValue, ParseContext};
use crate::labels::WHITELIST_SOURCE_RANGE;
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

/// Client CIDRs allowed to reach a Location. Empty allows everyone.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRange {
    pub cidrs: Vec<String>,
}

pub(super) fn parse(ing: &Ingress, ctx: &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError> {
    let raw = match get_string(ing, WHITELIST_SOURCE_RANGE) {
        Ok(raw) => raw,
        Err(AnnotationError::Missing) => ctx.defaults.whitelist_source_range.join(","),
        Err(e) => return Err(e),
    };

    let cidrs = parse_cidrs(&raw).map_err(AnnotationError::denied)?;
    Ok(AnnotationValue::Whitelist(SourceRange { cidrs }))
}
