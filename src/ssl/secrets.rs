// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Secret Synchronizer.
//!
//! Turns TLS-bearing secrets into certificate material on disk and keeps the
//! [`CertificateTracker`] in step with them. Every entry point is idempotent:
//! replaying the same secret yields [`SyncOutcome::Unchanged`] and touches neither
//! the disk nor the tracker.
//!
//! # Processing
//!
//! 1. Ensure the default certificate exists under [`DEFAULT_CERTIFICATE_KEY`]
//! 2. Skip secrets no managed `Ingress` references
//! 3. Classify the payload (`tls.crt` + `tls.key` with optional `ca.crt`, or `ca.crt` alone)
//! 4. Persist, fingerprint and upsert the [`CertificateRecord`]
//!
//! The tracker is only written after every file write has succeeded.

use super::{
    ca_path, certificate_info, check_private_key, fingerprint, generate_self_signed,
    parse_certificates, pem_path, verify_with_ca, write_all_atomic, write_atomic, CertificateInfo,
    CertificateTracker,
};
use crate::annotations::IngressClassFilter;
use crate::constants::{
    CERT_EXPIRY_WARNING_SECS, DEFAULT_CERTIFICATE_KEY, FAKE_CERTIFICATE_FILE,
    FAKE_CERTIFICATE_HOST, SECRET_CA_KEY, SECRET_TLS_CERT_KEY, SECRET_TLS_KEY_KEY,
};
use crate::errors::CertificateError;
use crate::metrics;
use crate::model::CertificateRecord;
use crate::selector::find_ingresses_for_secret;
use crate::store::{split_key, ObjectCache};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of a successful [`SecretSynchronizer::sync_secret`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No managed rule references the secret
    Skipped,
    /// Persisted material already matches the secret
    Unchanged,
    /// First time the secret is tracked
    Added,
    /// Tracked material was replaced
    Updated,
}

impl SyncOutcome {
    /// Metrics label for the outcome.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Updated => "updated",
        }
    }
}

/// Classified secret payload, ready to persist.
enum Material {
    KeyPair {
        bundle: Vec<u8>,
        ca: Option<Vec<u8>>,
        info: CertificateInfo,
    },
    CaOnly {
        ca: Vec<u8>,
        info: CertificateInfo,
    },
}

impl Material {
    fn fingerprint(&self) -> String {
        match self {
            Self::KeyPair { bundle, ca, .. } => {
                let mut content = bundle.clone();
                if let Some(ca) = ca {
                    content.extend_from_slice(ca);
                }
                fingerprint(&content)
            }
            Self::CaOnly { ca, .. } => fingerprint(ca),
        }
    }

    fn info(&self) -> &CertificateInfo {
        match self {
            Self::KeyPair { info, .. } | Self::CaOnly { info, .. } => info,
        }
    }
}

pub struct SecretSynchronizer {
    secrets: Arc<dyn ObjectCache<Secret>>,
    ingresses: Arc<dyn ObjectCache<Ingress>>,
    tracker: Arc<CertificateTracker>,
    class_filter: IngressClassFilter,
    ssl_dir: PathBuf,
    /// Secret key configured to serve as default certificate
    default_ssl_certificate: Option<String>,
    default_lock: Mutex<()>,
}

impl SecretSynchronizer {
    #[must_use]
    pub fn new(
        secrets: Arc<dyn ObjectCache<Secret>>,
        ingresses: Arc<dyn ObjectCache<Ingress>>,
        tracker: Arc<CertificateTracker>,
        class_filter: IngressClassFilter,
        ssl_dir: impl Into<PathBuf>,
        default_ssl_certificate: Option<String>,
    ) -> Self {
        Self {
            secrets,
            ingresses,
            tracker,
            class_filter,
            ssl_dir: ssl_dir.into(),
            default_ssl_certificate: default_ssl_certificate.filter(|k| !k.is_empty()),
            default_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<CertificateTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn ssl_dir(&self) -> &Path {
        &self.ssl_dir
    }

    /// Returns true if a managed `Ingress` references the secret.
    #[must_use]
    pub fn is_referenced(&self, key: &str) -> bool {
        !find_ingresses_for_secret(self.ingresses.as_ref(), &self.class_filter, key).is_empty()
    }

    fn is_default_source(&self, key: &str) -> bool {
        self.default_ssl_certificate.as_deref() == Some(key)
    }

    /// Makes sure a record exists under [`DEFAULT_CERTIFICATE_KEY`].
    ///
    /// The configured default secret is preferred. When it is unset or unusable a
    /// self-signed certificate is generated once and persisted to
    /// `{ssl_dir}/default-fake-certificate.pem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback certificate cannot be generated or written.
    pub async fn ensure_default_certificate(&self) -> Result<(), CertificateError> {
        let _guard = self.default_lock.lock().await;
        if self.tracker.get(DEFAULT_CERTIFICATE_KEY).is_some() {
            return Ok(());
        }

        if let Some(source) = &self.default_ssl_certificate {
            match self.load_and_persist(source).await {
                Ok(record) => {
                    info!(secret = %source, "Using configured default SSL certificate");
                    self.tracker.add_or_update(DEFAULT_CERTIFICATE_KEY, record);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        secret = %source,
                        error = %e,
                        "Configured default SSL certificate is unusable, generating a self-signed one"
                    );
                }
            }
        }

        let record = self.generate_fake_certificate().await?;
        self.tracker.add_or_update(DEFAULT_CERTIFICATE_KEY, record);
        Ok(())
    }

    async fn generate_fake_certificate(&self) -> Result<CertificateRecord, CertificateError> {
        let (cert_pem, key_pem) = generate_self_signed(&[FAKE_CERTIFICATE_HOST])?;
        let mut bundle = cert_pem.into_bytes();
        bundle.extend_from_slice(key_pem.as_bytes());

        let certs = parse_certificates(DEFAULT_CERTIFICATE_KEY, &bundle)?;
        let leaf = certs.first().ok_or_else(|| CertificateError::NoCertificateData {
            key: DEFAULT_CERTIFICATE_KEY.to_string(),
        })?;
        let info = certificate_info(DEFAULT_CERTIFICATE_KEY, leaf)?;

        let path = self.ssl_dir.join(FAKE_CERTIFICATE_FILE);
        write_atomic(&path, &bundle).await?;
        info!(path = %path.display(), "Generated self-signed default SSL certificate");

        let (namespace, name) = split_key(DEFAULT_CERTIFICATE_KEY);
        Ok(CertificateRecord {
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
            ca_file_name: None,
            pem_file_name: path.display().to_string(),
            pem_sha: fingerprint(&bundle),
            cn: info.names,
            expire_time: Some(info.not_after),
        })
    }

    /// Synchronizes one secret (`namespace/name`) into the tracker.
    ///
    /// # Errors
    ///
    /// Returns an error when the secret is referenced but missing, malformed, fails CA
    /// verification or cannot be written. The tracker is untouched in every error case.
    pub async fn sync_secret(&self, key: &str) -> Result<SyncOutcome, CertificateError> {
        let result = self.sync_secret_inner(key).await;
        match &result {
            Ok(outcome) => metrics::record_secret_sync(outcome.as_str()),
            Err(e) => {
                metrics::record_secret_sync("error");
                metrics::record_error("secrets", e.metric_label());
            }
        }
        result
    }

    async fn sync_secret_inner(&self, key: &str) -> Result<SyncOutcome, CertificateError> {
        self.ensure_default_certificate().await?;

        let is_default_source = self.is_default_source(key);
        if !is_default_source && !self.is_referenced(key) {
            debug!(secret = %key, "Secret is not referenced by any managed ingress, skipping");
            return Ok(SyncOutcome::Skipped);
        }

        let secret = self
            .secrets
            .get_by_key(key)
            .ok_or_else(|| CertificateError::SecretNotFound {
                key: key.to_string(),
            })?;
        let material = classify(key, &secret)?;
        let sha = material.fingerprint();

        let previous = self.tracker.get(key);
        if previous.as_ref().is_some_and(|r| r.pem_sha == sha) {
            debug!(secret = %key, "Certificate material unchanged");
            if is_default_source {
                self.refresh_default(key);
            }
            return Ok(SyncOutcome::Unchanged);
        }

        let record = self.persist(key, &material, sha).await?;
        warn_if_expiring(key, &record);
        self.tracker.add_or_update(key, record);
        if is_default_source {
            self.refresh_default(key);
        }

        if previous.is_some() {
            info!(secret = %key, "Updated certificate material");
            Ok(SyncOutcome::Updated)
        } else {
            info!(secret = %key, "Added certificate material");
            Ok(SyncOutcome::Added)
        }
    }

    /// Copies the configured default secret's record over the default key.
    fn refresh_default(&self, key: &str) {
        if let Some(record) = self.tracker.get(key) {
            self.tracker
                .add_or_update(DEFAULT_CERTIFICATE_KEY, record.as_ref().clone());
        }
    }

    /// Drops a deleted secret from the tracker. Files on disk are left in place.
    pub fn delete_secret(&self, key: &str) -> bool {
        if key == DEFAULT_CERTIFICATE_KEY {
            return false;
        }
        let removed = self.tracker.delete(key).is_some();
        if removed {
            info!(secret = %key, "Removed certificate material");
            metrics::record_secret_sync("removed");
        }
        removed
    }

    async fn load_and_persist(&self, key: &str) -> Result<CertificateRecord, CertificateError> {
        let secret = self
            .secrets
            .get_by_key(key)
            .ok_or_else(|| CertificateError::SecretNotFound {
                key: key.to_string(),
            })?;
        let material = classify(key, &secret)?;
        if matches!(material, Material::CaOnly { .. }) {
            return Err(CertificateError::NoCertificateData {
                key: key.to_string(),
            });
        }
        let sha = material.fingerprint();
        self.persist(key, &material, sha).await
    }

    async fn persist(
        &self,
        key: &str,
        material: &Material,
        sha: String,
    ) -> Result<CertificateRecord, CertificateError> {
        let (namespace, name) = split_key(key);
        let namespace = namespace.unwrap_or_default();
        let info = material.info().clone();

        let (pem_file_name, ca_file_name) = match material {
            Material::KeyPair { bundle, ca, .. } => {
                let pem = pem_path(&self.ssl_dir, namespace, name);
                let ca_file = ca.as_ref().map(|_| ca_path(&self.ssl_dir, namespace, name));
                let mut files: Vec<(&Path, &[u8])> = vec![(pem.as_path(), bundle.as_slice())];
                if let (Some(path), Some(ca)) = (&ca_file, ca) {
                    files.push((path.as_path(), ca.as_slice()));
                }
                write_all_atomic(&files).await?;
                (
                    pem.display().to_string(),
                    ca_file.map(|p| p.display().to_string()),
                )
            }
            Material::CaOnly { ca, .. } => {
                let path = ca_path(&self.ssl_dir, namespace, name);
                write_atomic(&path, ca).await?;
                let path = path.display().to_string();
                (path.clone(), Some(path))
            }
        };

        Ok(CertificateRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ca_file_name,
            pem_file_name,
            pem_sha: sha,
            cn: info.names,
            expire_time: Some(info.not_after),
        })
    }
}

/// Returns the non-empty value stored under `data_key`.
fn secret_data<'a>(secret: &'a Secret, data_key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(data_key))
        .map(|bytes| bytes.0.as_slice())
        .filter(|bytes| !bytes.is_empty())
}

fn classify(key: &str, secret: &Secret) -> Result<Material, CertificateError> {
    let cert = secret_data(secret, SECRET_TLS_CERT_KEY);
    let private_key = secret_data(secret, SECRET_TLS_KEY_KEY);
    let ca = secret_data(secret, SECRET_CA_KEY);

    match (cert, private_key, ca) {
        (Some(cert), Some(private_key), ca) => {
            let certs = parse_certificates(key, cert)?;
            let leaf = certs.first().ok_or_else(|| CertificateError::NoCertificateData {
                key: key.to_string(),
            })?;
            check_private_key(key, private_key)?;
            let info = certificate_info(key, leaf)?;

            if let Some(ca) = ca {
                let anchors = parse_certificates(key, ca)?;
                verify_with_ca(key, leaf, &anchors)?;
            }

            let mut bundle = cert.to_vec();
            if !bundle.ends_with(b"\n") {
                bundle.push(b'\n');
            }
            bundle.extend_from_slice(private_key);

            Ok(Material::KeyPair {
                bundle,
                ca: ca.map(<[u8]>::to_vec),
                info,
            })
        }
        (None, None, Some(ca)) => {
            let anchors = parse_certificates(key, ca)?;
            let first = anchors.first().ok_or_else(|| CertificateError::NoCertificateData {
                key: key.to_string(),
            })?;
            let info = certificate_info(key, first)?;
            Ok(Material::CaOnly {
                ca: ca.to_vec(),
                info,
            })
        }
        _ => Err(CertificateError::NoCertificateData {
            key: key.to_string(),
        }),
    }
}

fn warn_if_expiring(key: &str, record: &CertificateRecord) {
    let Some(expire_time) = record.expire_time else {
        return;
    };
    let remaining = expire_time - chrono::Utc::now().timestamp();
    if remaining < CERT_EXPIRY_WARNING_SECS {
        warn!(
            secret = %key,
            expire_time = expire_time,
            remaining_secs = remaining,
            "Certificate expires within 10 days"
        );
    }
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod secrets_tests;
