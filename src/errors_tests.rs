// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `errors.rs`

#[cfg(test)]
mod tests {
    use crate::errors::*;

    #[test]
    fn test_secret_not_found_error() {
        let error = CertificateError::SecretNotFound {
            key: "default/tls".to_string(),
        };

        assert_eq!(error.to_string(), "Secret 'default/tls' not found");
    }

    #[test]
    fn test_ca_verification_failed_error() {
        let error = CertificateError::CaVerificationFailed {
            key: "default/tls".to_string(),
            reason: "signature mismatch".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "CA in secret 'default/tls' does not verify the certificate: signature mismatch"
        );
        assert_eq!(error.metric_label(), "ca_verification_failed");
    }

    #[test]
    fn test_resolve_port_not_found_error() {
        let error = ResolveError::PortNotFound {
            key: "default/web".to_string(),
            port: "http".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Service 'default/web' has no port matching 'http'"
        );
    }

    #[test]
    fn test_sync_error_wraps_certificate_error() {
        let error: SyncError = CertificateError::Generation {
            reason: "no entropy".to_string(),
        }
        .into();

        assert_eq!(
            error.to_string(),
            "Failed to generate default certificate: no entropy"
        );
        assert_eq!(error.metric_label(), "certificate");
    }

    #[test]
    fn test_adapter_failures_have_distinct_labels() {
        let render = SyncError::RenderFailed {
            backend: "json-file".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(render.metric_label(), "render_failed");

        let reload = SyncError::ReloadFailed {
            backend: "json-file".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(reload.metric_label(), "reload_failed");
    }
}
