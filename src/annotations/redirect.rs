// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Temporal (302) and permanent (301) redirects plus www/non-www canonicalization.
//!
//! When both redirect annotations are present the temporal one wins.

use super::parser::{get_bool_or, get_string, AnnotationError};
use super::{AnnotationValue, ParseContext};
use crate::labels::{
    NON_WWW_TO_WWW_REDIRECT, PERMANENT_REDIRECT, TEMPORAL_REDIRECT, WWW_TO_NON_WWW_REDIRECT,
};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

const STATUS_FOUND: u16 = 302;
const STATUS_MOVED_PERMANENTLY: u16 = 301;

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    /// Empty when only www canonicalization is requested
    pub url: String,
    /// HTTP status, 0 without a URL
    pub code: u16,
    pub to_www: bool,
    pub to_non_www: bool,
}

pub(super) fn parse(ing: &Ingress, _ctx: &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError> {
    let to_www = get_bool_or(ing, NON_WWW_TO_WWW_REDIRECT, false);
    let to_non_www = get_bool_or(ing, WWW_TO_NON_WWW_REDIRECT, false);

    for (key, code) in [
        (TEMPORAL_REDIRECT, STATUS_FOUND),
        (PERMANENT_REDIRECT, STATUS_MOVED_PERMANENTLY),
    ] {
        if let Ok(url) = get_string(ing, key) {
            validate_url(key, &url)?;
            return Ok(AnnotationValue::Redirect(Redirect {
                url,
                code,
                to_www,
                to_non_www,
            }));
        }
    }

    if to_www || to_non_www {
        return Ok(AnnotationValue::Redirect(Redirect {
            to_www,
            to_non_www,
            ..Default::default()
        }));
    }

    Err(AnnotationError::Missing)
}

fn validate_url(key: &str, raw: &str) -> Result<(), AnnotationError> {
    let url = url::Url::parse(raw).map_err(|e| AnnotationError::invalid(key, e.to_string()))?;
    if !url.scheme().starts_with("http") {
        return Err(AnnotationError::invalid(
            key,
            format!("only http and https are valid protocols ({})", url.scheme()),
        ));
    }
    Ok(())
}
