// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation Extractor.
//!
//! Derives a feature-name → value mapping from an `Ingress` by running every entry of
//! a fixed parser registry. Parsers are independent and individually fallible:
//!
//! - [`AnnotationError::Missing`] skips the feature silently.
//! - [`AnnotationError::Denied`] is recorded under [`DENIED_KEY`] (first one wins)
//!   without stopping the remaining parsers.
//! - [`AnnotationError::Invalid`] is logged and the feature is skipped.
//!
//! Consumers must apply features in this order: certificate auth, whitelist, rate
//! limit, basic/digest auth, external auth, redirect. The extractor does not enforce it.
//!
//! Adding a feature means adding one registry entry and one [`AnnotationValue`] variant.

pub mod auth;
pub mod authreq;
pub mod authtls;
pub mod class;
pub mod ipwhitelist;
pub mod parser;
pub mod proxy;
pub mod ratelimit;
pub mod redirect;
pub mod rewrite;
pub mod upstream;

pub use auth::BasicDigest;
pub use authreq::ExternalAuth;
pub use authtls::CertificateAuth;
pub use class::IngressClassFilter;
pub use ipwhitelist::SourceRange;
pub use parser::AnnotationError;
pub use proxy::ProxyConfig;
pub use ratelimit::{RateLimit, Zone};
pub use redirect::Redirect;
pub use rewrite::Rewrite;
pub use upstream::{HealthCheck, SecureUpstream};

use crate::defaults::BackendDefaults;
use crate::labels::{CONFIGURATION_SNIPPET, ENABLE_CORS, USE_PORT_IN_REDIRECTS};
use crate::model::Location;
use crate::ssl::CertificateTracker;
use crate::store::ObjectCache;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error};

/// Key under which the first denial reason is stored
pub const DENIED_KEY: &str = "Denied";

pub const BASIC_DIGEST_AUTH: &str = "BasicDigestAuth";
pub const EXTERNAL_AUTH: &str = "ExternalAuth";
pub const CERTIFICATE_AUTH: &str = "CertificateAuth";
pub const ENABLE_CORS_FEATURE: &str = "EnableCORS";
pub const HEALTH_CHECK: &str = "HealthCheck";
pub const WHITELIST: &str = "Whitelist";
pub const USE_PORT_IN_REDIRECTS_FEATURE: &str = "UsePortInRedirects";
pub const PROXY: &str = "Proxy";
pub const RATE_LIMIT: &str = "RateLimit";
pub const REDIRECT: &str = "Redirect";
pub const REWRITE: &str = "Rewrite";
pub const SECURE_UPSTREAM: &str = "SecureUpstream";
pub const SERVICE_UPSTREAM: &str = "ServiceUpstream";
pub const SSL_PASSTHROUGH: &str = "SSLPassthrough";
pub const CONFIGURATION_SNIPPET_FEATURE: &str = "ConfigurationSnippet";

/// Value produced by one parser.
#[derive(Clone, Debug, PartialEq)]
pub enum AnnotationValue {
    BasicDigestAuth(BasicDigest),
    ExternalAuth(ExternalAuth),
    CertificateAuth(CertificateAuth),
    EnableCors(bool),
    HealthCheck(HealthCheck),
    Whitelist(SourceRange),
    UsePortInRedirects(bool),
    Proxy(ProxyConfig),
    RateLimit(RateLimit),
    Redirect(Redirect),
    Rewrite(Rewrite),
    SecureUpstream(SecureUpstream),
    ServiceUpstream(bool),
    SslPassthrough(bool),
    ConfigurationSnippet(String),
    /// Reason the rule must not be served
    Denied(String),
}

/// Collaborators parsers may consult.
pub struct ParseContext<'a> {
    pub defaults: &'a BackendDefaults,
    pub secrets: &'a dyn ObjectCache<Secret>,
    pub certificates: &'a CertificateTracker,
    /// Directory receiving generated credentials files
    pub auth_dir: &'a Path,
}

type ParseFn = fn(&Ingress, &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError>;

/// One registry entry.
pub struct ParserEntry {
    pub name: &'static str,
    pub parse: ParseFn,
}

/// Every feature known to the extractor.
pub static REGISTRY: &[ParserEntry] = &[
    ParserEntry { name: BASIC_DIGEST_AUTH, parse: auth::parse },
    ParserEntry { name: EXTERNAL_AUTH, parse: authreq::parse },
    ParserEntry { name: CERTIFICATE_AUTH, parse: authtls::parse },
    ParserEntry { name: ENABLE_CORS_FEATURE, parse: parse_enable_cors },
    ParserEntry { name: HEALTH_CHECK, parse: upstream::parse_health_check },
    ParserEntry { name: WHITELIST, parse: ipwhitelist::parse },
    ParserEntry { name: USE_PORT_IN_REDIRECTS_FEATURE, parse: parse_use_port_in_redirects },
    ParserEntry { name: PROXY, parse: proxy::parse },
    ParserEntry { name: RATE_LIMIT, parse: ratelimit::parse },
    ParserEntry { name: REDIRECT, parse: redirect::parse },
    ParserEntry { name: REWRITE, parse: rewrite::parse },
    ParserEntry { name: SECURE_UPSTREAM, parse: upstream::parse_secure_upstream },
    ParserEntry { name: SERVICE_UPSTREAM, parse: upstream::parse_service_upstream },
    ParserEntry { name: SSL_PASSTHROUGH, parse: upstream::parse_ssl_passthrough },
    ParserEntry { name: CONFIGURATION_SNIPPET_FEATURE, parse: parse_configuration_snippet },
];

fn parse_enable_cors(ing: &Ingress, _ctx: &ParseContext<'_>) -> Result<AnnotationValue, AnnotationError> {
    parser::get_bool(ing, ENABLE_CORS).map(AnnotationValue::EnableCors)
}

fn parse_use_port_in_redirects(
    ing: &Ingress,
    ctx: &ParseContext<'_>,
) -> Result<AnnotationValue, AnnotationError> {
    Ok(AnnotationValue::UsePortInRedirects(parser::get_bool_or(
        ing,
        USE_PORT_IN_REDIRECTS,
        ctx.defaults.use_port_in_redirects,
    )))
}

fn parse_configuration_snippet(
    ing: &Ingress,
    _ctx: &ParseContext<'_>,
) -> Result<AnnotationValue, AnnotationError> {
    parser::get_string(ing, CONFIGURATION_SNIPPET).map(AnnotationValue::ConfigurationSnippet)
}

/// Feature name → value mapping for one rule.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractedAnnotations {
    values: BTreeMap<&'static str, AnnotationValue>,
}

impl ExtractedAnnotations {
    #[must_use]
    pub fn get(&self, feature: &str) -> Option<&AnnotationValue> {
        self.values.get(feature)
    }

    /// First denial reason, if any parser denied the rule.
    #[must_use]
    pub fn denied(&self) -> Option<&str> {
        match self.values.get(DENIED_KEY) {
            Some(AnnotationValue::Denied(reason)) => Some(reason),
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copies every Location-level feature onto `location`.
    pub fn apply_to(&self, location: &mut Location) {
        for value in self.values.values() {
            match value {
                AnnotationValue::BasicDigestAuth(v) => location.basic_digest_auth = Some(v.clone()),
                AnnotationValue::ExternalAuth(v) => location.external_auth = Some(v.clone()),
                AnnotationValue::CertificateAuth(v) => location.certificate_auth = Some(v.clone()),
                AnnotationValue::EnableCors(v) => location.enable_cors = *v,
                AnnotationValue::Whitelist(v) => location.whitelist = v.clone(),
                AnnotationValue::UsePortInRedirects(v) => location.use_port_in_redirects = *v,
                AnnotationValue::Proxy(v) => location.proxy = v.clone(),
                AnnotationValue::RateLimit(v) => location.rate_limit = v.clone(),
                AnnotationValue::Redirect(v) => location.redirect = Some(v.clone()),
                AnnotationValue::Rewrite(v) => location.rewrite = v.clone(),
                AnnotationValue::ConfigurationSnippet(v) => {
                    location.configuration_snippet = v.clone();
                }
                AnnotationValue::Denied(reason) => location.denied = Some(reason.clone()),
                AnnotationValue::HealthCheck(_)
                | AnnotationValue::SecureUpstream(_)
                | AnnotationValue::ServiceUpstream(_)
                | AnnotationValue::SslPassthrough(_) => {}
            }
        }
    }
}

/// Runs the parser registry against rules.
pub struct AnnotationExtractor<'a> {
    ctx: ParseContext<'a>,
}

impl<'a> AnnotationExtractor<'a> {
    #[must_use]
    pub fn new(ctx: ParseContext<'a>) -> Self {
        Self { ctx }
    }

    /// Runs every registered parser against `ing`.
    #[must_use]
    pub fn extract(&self, ing: &Ingress) -> ExtractedAnnotations {
        let namespace = ing.metadata.namespace.as_deref().unwrap_or_default();
        let name = ing.metadata.name.as_deref().unwrap_or_default();
        let mut values = BTreeMap::new();

        for entry in REGISTRY {
            match (entry.parse)(ing, &self.ctx) {
                Ok(value) => {
                    values.insert(entry.name, value);
                }
                Err(AnnotationError::Missing) => {}
                Err(AnnotationError::Denied { reason }) => {
                    if values.contains_key(DENIED_KEY) {
                        debug!(
                            feature = entry.name,
                            namespace = namespace,
                            ingress = name,
                            reason = %reason,
                            "Additional denial ignored"
                        );
                    } else {
                        error!(
                            feature = entry.name,
                            namespace = namespace,
                            ingress = name,
                            reason = %reason,
                            "Ingress denied by annotation"
                        );
                        values.insert(DENIED_KEY, AnnotationValue::Denied(reason));
                    }
                }
                Err(e @ AnnotationError::Invalid { .. }) => {
                    error!(
                        feature = entry.name,
                        namespace = namespace,
                        ingress = name,
                        error = %e,
                        "Error reading annotation, skipping feature"
                    );
                }
            }
        }

        ExtractedAnnotations { values }
    }

    fn run(&self, feature: &str, ing: &Ingress) -> Option<AnnotationValue> {
        REGISTRY
            .iter()
            .find(|entry| entry.name == feature)
            .and_then(|entry| (entry.parse)(ing, &self.ctx).ok())
    }

    /// Secure upstream settings, never absent.
    #[must_use]
    pub fn secure_upstream(&self, ing: &Ingress) -> SecureUpstream {
        match self.run(SECURE_UPSTREAM, ing) {
            Some(AnnotationValue::SecureUpstream(v)) => v,
            _ => SecureUpstream {
                secure: parser::get_bool_or(ing, crate::labels::SECURE_BACKENDS, false),
                ca_cert: None,
            },
        }
    }

    /// Health check settings, defaulted from the backend defaults.
    #[must_use]
    pub fn health_check(&self, ing: &Ingress) -> HealthCheck {
        match self.run(HEALTH_CHECK, ing) {
            Some(AnnotationValue::HealthCheck(v)) => v,
            _ => HealthCheck {
                max_fails: self.ctx.defaults.upstream_max_fails,
                fail_timeout: self.ctx.defaults.upstream_fail_timeout,
            },
        }
    }

    /// Whether TLS is passed through untouched, false when absent.
    #[must_use]
    pub fn ssl_passthrough(&self, ing: &Ingress) -> bool {
        matches!(
            self.run(SSL_PASSTHROUGH, ing),
            Some(AnnotationValue::SslPassthrough(true))
        )
    }

    /// Whether the service ClusterIP replaces pod endpoints, false when absent.
    #[must_use]
    pub fn service_upstream(&self, ing: &Ingress) -> bool {
        matches!(
            self.run(SERVICE_UPSTREAM, ing),
            Some(AnnotationValue::ServiceUpstream(true))
        )
    }
}
