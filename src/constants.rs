// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the ingress controller core.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Configuration Model Constants
// ============================================================================

/// Name of the Backend seeded from the configured fallback service
pub const DEFAULT_BACKEND_NAME: &str = "upstream-default-backend";

/// Hostname of the catch-all Server that is always present
pub const DEFAULT_SERVER_NAME: &str = "_";

/// Root path; its Location is always sorted last within a Server
pub const ROOT_LOCATION: &str = "/";

/// Default sentinel endpoint used when a Backend has no real endpoints
pub const DEFAULT_SENTINEL_ENDPOINT: &str = "127.0.0.1:8181";

/// Ports the proxy listens on itself; stream services may not claim them
pub const RESERVED_STREAM_PORTS: [u16; 4] = [80, 443, 8181, 18080];

// ============================================================================
// Certificate Constants
// ============================================================================

/// Reserved tracker key for the bootstrap default certificate
pub const DEFAULT_CERTIFICATE_KEY: &str = "default/default-ssl-certificate";

/// File name of the generated self-signed fallback certificate
pub const FAKE_CERTIFICATE_FILE: &str = "default-fake-certificate.pem";

/// Common name of the generated self-signed fallback certificate
pub const FAKE_CERTIFICATE_CN: &str = "Ingress Controller Fake Certificate";

/// Subject alternative name of the generated self-signed fallback certificate
pub const FAKE_CERTIFICATE_HOST: &str = "ingress.local";

/// Secret data key holding the certificate
pub const SECRET_TLS_CERT_KEY: &str = "tls.crt";

/// Secret data key holding the private key
pub const SECRET_TLS_KEY_KEY: &str = "tls.key";

/// Secret data key holding the CA bundle
pub const SECRET_CA_KEY: &str = "ca.crt";

/// Secret data key holding an htpasswd-compatible auth file
pub const SECRET_AUTH_KEY: &str = "auth";

/// Certificates expiring within this window are warned about (10 days)
pub const CERT_EXPIRY_WARNING_SECS: i64 = 240 * 3600;

// ============================================================================
// Controller Defaults
// ============================================================================

/// Default ingress class handled by the controller
pub const DEFAULT_INGRESS_CLASS: &str = "nginx";

/// Default directory for persisted certificate material
pub const DEFAULT_SSL_DIRECTORY: &str = "/ingress-controller/ssl";

/// Default directory for generated auth files
pub const DEFAULT_AUTH_DIRECTORY: &str = "/etc/ingress-controller/auth";

/// Default interval between full resyncs (60 seconds)
pub const DEFAULT_SYNC_PERIOD_SECS: u64 = 60;

/// Default interval between status updates (30 seconds)
pub const DEFAULT_STATUS_UPDATE_INTERVAL_SECS: u64 = 30;

/// Default name of the leader election lease
pub const DEFAULT_ELECTION_ID: &str = "ingress-controller-leader";

/// Default port for the health and metrics HTTP server
pub const DEFAULT_HEALTH_PORT: u16 = 10254;

/// Default output file of the reference backend
pub const DEFAULT_CONFIG_OUTPUT: &str = "/etc/ingress-controller/configuration.json";

// ============================================================================
// Sync Engine Constants
// ============================================================================

/// Sustained rebuild rate of the sync queue (0.3 per second)
pub const SYNC_RATE_LIMIT_QPS: f64 = 0.3;

/// Burst capacity of the sync queue rate limiter
pub const SYNC_RATE_LIMIT_BURST: u32 = 1;

/// Delay before retrying when caches have not completed their initial sync
pub const CACHE_NOT_READY_REQUEUE_SECS: u64 = 1;

/// Name of the opaque item that collapses all rebuild notifications
pub const SYNC_QUEUE_ITEM: &str = "rebuild";

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Grace period before the lease is considered lost (5 seconds)
pub const DEFAULT_LEASE_GRACE_SECS: u64 = 5;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Path for the liveness endpoint
pub const HEALTHZ_PATH: &str = "/healthz";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
