// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the reconciliation core.
//!
//! This module provides specialized error types for:
//! - TLS secret handling (classification, verification, persistence)
//! - Per-Backend service and endpoint resolution
//! - Sync Engine passes (cache readiness, backend adapter failures)
//!
//! Resolution errors never abort a pass; they degrade the affected Backend to the
//! sentinel endpoint. Certificate errors are scoped to a single secret. Only
//! [`SyncError`] is surfaced to the queue as a retryable signal.

use thiserror::Error;

/// Errors that can occur while turning a secret into tracked certificate material.
///
/// Each error is scoped to one secret; the Certificate Tracker is left untouched
/// when any of them is returned.
#[derive(Error, Debug, Clone)]
pub enum CertificateError {
    /// Secret is not present in the secrets cache
    #[error("Secret '{key}' not found")]
    SecretNotFound {
        /// Secret key (`namespace/name`)
        key: String,
    },

    /// Secret carries neither a cert/key pair nor a CA bundle
    ///
    /// A TLS secret must provide `tls.crt` and `tls.key`, or `ca.crt` alone.
    #[error("Secret '{key}' has no certificate and key pair or CA bundle")]
    NoCertificateData {
        /// Secret key (`namespace/name`)
        key: String,
    },

    /// PEM payload could not be decoded
    #[error("Invalid PEM data in secret '{key}': {reason}")]
    InvalidPem {
        /// Secret key (`namespace/name`)
        key: String,
        /// Decoder failure
        reason: String,
    },

    /// Certificate could not be parsed as X.509
    #[error("Invalid certificate in secret '{key}': {reason}")]
    InvalidCertificate {
        /// Secret key (`namespace/name`)
        key: String,
        /// Parser failure
        reason: String,
    },

    /// Bundled CA did not sign the leaf certificate
    ///
    /// This is a hard error for the secret. A bundle that cannot vouch for its own
    /// leaf is never persisted.
    #[error("CA in secret '{key}' does not verify the certificate: {reason}")]
    CaVerificationFailed {
        /// Secret key (`namespace/name`)
        key: String,
        /// Verification failure
        reason: String,
    },

    /// Writing certificate material to disk failed
    #[error("Failed to write '{path}': {reason}")]
    Persist {
        /// Target file path
        path: String,
        /// I/O failure
        reason: String,
    },

    /// Generating the self-signed fallback certificate failed
    #[error("Failed to generate default certificate: {reason}")]
    Generation {
        /// Generator failure
        reason: String,
    },
}

/// Errors resolving the endpoints of a single Backend.
///
/// These are recovered locally by the Backend Model Builder: the Backend is
/// degraded to the sentinel endpoint and the pass continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Referenced Service does not exist
    #[error("Service '{key}' not found")]
    ServiceNotFound {
        /// Service key (`namespace/name`)
        key: String,
    },

    /// Service exists but exposes no port matching the reference
    #[error("Service '{key}' has no port matching '{port}'")]
    PortNotFound {
        /// Service key (`namespace/name`)
        key: String,
        /// Port number or name as written in the rule
        port: String,
    },

    /// Named `targetPort` could not be resolved from the cached annotation or pods
    #[error("Named port '{port}' of service '{key}' could not be resolved")]
    NamedPortUnresolved {
        /// Service key (`namespace/name`)
        key: String,
        /// `targetPort` name
        port: String,
    },

    /// Service resolved but has no ready endpoints
    #[error("Service '{key}' has no active endpoints")]
    NoEndpoints {
        /// Service key (`namespace/name`)
        key: String,
    },
}

/// Errors surfaced by a Sync Engine pass.
///
/// All variants are retryable: the queue requeues the rebuild with backoff and the
/// previously activated configuration keeps serving.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Backend adapter failed to render the configuration
    #[error("Backend '{backend}' failed to render configuration: {reason}")]
    RenderFailed {
        /// Adapter name from `Info`
        backend: String,
        /// Adapter failure
        reason: String,
    },

    /// Backend adapter failed to activate the rendered configuration
    #[error("Backend '{backend}' failed to reload: {reason}")]
    ReloadFailed {
        /// Adapter name from `Info`
        backend: String,
        /// Adapter failure
        reason: String,
    },

    /// Default certificate could not be ensured before the build
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

impl SyncError {
    /// Returns the error category used as a metrics label.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::RenderFailed { .. } => "render_failed",
            Self::ReloadFailed { .. } => "reload_failed",
            Self::Certificate(_) => "certificate",
        }
    }
}

impl CertificateError {
    /// Returns the error category used as a metrics label.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::SecretNotFound { .. } => "secret_not_found",
            Self::NoCertificateData { .. } => "no_certificate_data",
            Self::InvalidPem { .. } => "invalid_pem",
            Self::InvalidCertificate { .. } => "invalid_certificate",
            Self::CaVerificationFailed { .. } => "ca_verification_failed",
            Self::Persist { .. } => "persist_failed",
            Self::Generation { .. } => "generation_failed",
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
