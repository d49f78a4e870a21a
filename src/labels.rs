// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation keys read from `Ingress` and `Service` objects.
//!
//! Every routing feature is driven by an annotation under the
//! [`ANNOTATION_PREFIX`] namespace; the ingress class uses the upstream
//! Kubernetes key.

// ============================================================================
// Kubernetes Standard Annotations
// ============================================================================

/// Annotation selecting which controller manages an `Ingress`
pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";

/// Prefix shared by all controller-specific annotations
pub const ANNOTATION_PREFIX: &str = "ingress.kubernetes.io";

/// Service annotation caching `targetPort` names resolved from pod specs (JSON map)
pub const NAMED_PORT_ANNOTATION: &str = "ingress.kubernetes.io/named-ports";

// ============================================================================
// Authentication
// ============================================================================

pub const AUTH_TYPE: &str = "ingress.kubernetes.io/auth-type";
pub const AUTH_SECRET: &str = "ingress.kubernetes.io/auth-secret";
pub const AUTH_REALM: &str = "ingress.kubernetes.io/auth-realm";

pub const AUTH_URL: &str = "ingress.kubernetes.io/auth-url";
pub const AUTH_METHOD: &str = "ingress.kubernetes.io/auth-method";
pub const AUTH_SEND_BODY: &str = "ingress.kubernetes.io/auth-send-body";
pub const AUTH_RESPONSE_HEADERS: &str = "ingress.kubernetes.io/auth-response-headers";

pub const AUTH_TLS_SECRET: &str = "ingress.kubernetes.io/auth-tls-secret";
pub const AUTH_TLS_VERIFY_DEPTH: &str = "ingress.kubernetes.io/auth-tls-verify-depth";

// ============================================================================
// Traffic Shaping
// ============================================================================

pub const ENABLE_CORS: &str = "ingress.kubernetes.io/enable-cors";

pub const UPSTREAM_MAX_FAILS: &str = "ingress.kubernetes.io/upstream-max-fails";
pub const UPSTREAM_FAIL_TIMEOUT: &str = "ingress.kubernetes.io/upstream-fail-timeout";

pub const WHITELIST_SOURCE_RANGE: &str = "ingress.kubernetes.io/whitelist-source-range";

pub const PROXY_CONNECT_TIMEOUT: &str = "ingress.kubernetes.io/proxy-connect-timeout";
pub const PROXY_SEND_TIMEOUT: &str = "ingress.kubernetes.io/proxy-send-timeout";
pub const PROXY_READ_TIMEOUT: &str = "ingress.kubernetes.io/proxy-read-timeout";
pub const PROXY_BUFFER_SIZE: &str = "ingress.kubernetes.io/proxy-buffer-size";
pub const PROXY_BODY_SIZE: &str = "ingress.kubernetes.io/proxy-body-size";
pub const PROXY_COOKIE_PATH: &str = "ingress.kubernetes.io/proxy-cookie-path";
pub const PROXY_COOKIE_DOMAIN: &str = "ingress.kubernetes.io/proxy-cookie-domain";
pub const PROXY_NEXT_UPSTREAM: &str = "ingress.kubernetes.io/proxy-next-upstream";

pub const LIMIT_CONNECTIONS: &str = "ingress.kubernetes.io/limit-connections";
pub const LIMIT_RPS: &str = "ingress.kubernetes.io/limit-rps";
pub const LIMIT_RPM: &str = "ingress.kubernetes.io/limit-rpm";
pub const LIMIT_RATE: &str = "ingress.kubernetes.io/limit-rate";
pub const LIMIT_RATE_AFTER: &str = "ingress.kubernetes.io/limit-rate-after";
pub const LIMIT_WHITELIST: &str = "ingress.kubernetes.io/limit-whitelist";

// ============================================================================
// Redirects and Rewrites
// ============================================================================

pub const PERMANENT_REDIRECT: &str = "ingress.kubernetes.io/permanent-redirect";
pub const TEMPORAL_REDIRECT: &str = "ingress.kubernetes.io/temporal-redirect";
pub const NON_WWW_TO_WWW_REDIRECT: &str = "ingress.kubernetes.io/non-www-to-www-redirect";
pub const WWW_TO_NON_WWW_REDIRECT: &str = "ingress.kubernetes.io/www-to-non-www-redirect";

pub const REWRITE_TARGET: &str = "ingress.kubernetes.io/rewrite-target";
pub const ADD_BASE_URL: &str = "ingress.kubernetes.io/add-base-url";
pub const SSL_REDIRECT: &str = "ingress.kubernetes.io/ssl-redirect";
pub const FORCE_SSL_REDIRECT: &str = "ingress.kubernetes.io/force-ssl-redirect";
pub const USE_PORT_IN_REDIRECTS: &str = "ingress.kubernetes.io/use-port-in-redirects";

// ============================================================================
// Upstream Selection
// ============================================================================

pub const SECURE_BACKENDS: &str = "ingress.kubernetes.io/secure-backends";
pub const SECURE_VERIFY_CA_SECRET: &str = "ingress.kubernetes.io/secure-verify-ca-secret";
pub const SERVICE_UPSTREAM: &str = "ingress.kubernetes.io/service-upstream";
pub const SSL_PASSTHROUGH: &str = "ingress.kubernetes.io/ssl-passthrough";
pub const CONFIGURATION_SNIPPET: &str = "ingress.kubernetes.io/configuration-snippet";
