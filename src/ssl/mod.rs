// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! TLS material: the Certificate Tracker, the Secret Synchronizer and the PEM helpers
//! they share.
//!
//! Persisted files use deterministic, collision-free names derived from the secret
//! identity: `{ssl_dir}/{namespace}_{name}.pem` for bundles and
//! `{ssl_dir}/ca/{namespace}_{name}.pem` for CA anchors. `_` cannot appear in a
//! Kubernetes object name, so two secrets never share a file name, and CA anchors
//! live in their own directory so they never shadow a bundle.

pub mod secrets;
pub mod tracker;

pub use secrets::{SecretSynchronizer, SyncOutcome};
pub use tracker::CertificateTracker;

use crate::constants::FAKE_CERTIFICATE_CN;
use crate::errors::CertificateError;
use rcgen::{CertificateParams, DnType, KeyPair};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use x509_parser::prelude::*;

/// Names and expiry read from a leaf certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject CN first, then DNS subject alternative names
    pub names: Vec<String>,
    /// Unix seconds
    pub not_after: i64,
}

/// Hex SHA-256 of `content`.
#[must_use]
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Subdirectory of the SSL directory holding CA anchors
const CA_DIRECTORY: &str = "ca";

/// Path of the PEM bundle persisted for a secret.
#[must_use]
pub fn pem_path(ssl_dir: &Path, namespace: &str, name: &str) -> PathBuf {
    ssl_dir.join(format!("{namespace}_{name}.pem"))
}

/// Path of the CA anchor persisted for a secret.
#[must_use]
pub fn ca_path(ssl_dir: &Path, namespace: &str, name: &str) -> PathBuf {
    ssl_dir
        .join(CA_DIRECTORY)
        .join(format!("{namespace}_{name}.pem"))
}

/// Extracts every `CERTIFICATE` block from PEM data.
///
/// # Errors
///
/// Returns [`CertificateError::InvalidPem`] when the data cannot be decoded or holds
/// no certificate.
pub fn parse_certificates(key: &str, data: &[u8]) -> Result<Vec<Vec<u8>>, CertificateError> {
    let blocks = pem::parse_many(data).map_err(|e| CertificateError::InvalidPem {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    let certs: Vec<Vec<u8>> = blocks
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| block.contents().to_vec())
        .collect();
    if certs.is_empty() {
        return Err(CertificateError::InvalidPem {
            key: key.to_string(),
            reason: "no CERTIFICATE block found".to_string(),
        });
    }
    Ok(certs)
}

/// Checks that `data` holds a PEM private key.
///
/// # Errors
///
/// Returns [`CertificateError::InvalidPem`] when no private key block is present.
pub fn check_private_key(key: &str, data: &[u8]) -> Result<(), CertificateError> {
    let blocks = pem::parse_many(data).map_err(|e| CertificateError::InvalidPem {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    if blocks.iter().any(|block| block.tag().ends_with("PRIVATE KEY")) {
        Ok(())
    } else {
        Err(CertificateError::InvalidPem {
            key: key.to_string(),
            reason: "no PRIVATE KEY block found".to_string(),
        })
    }
}

/// Reads subject names and expiry from a DER certificate.
///
/// # Errors
///
/// Returns [`CertificateError::InvalidCertificate`] when the DER is not X.509.
pub fn certificate_info(key: &str, der: &[u8]) -> Result<CertificateInfo, CertificateError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| CertificateError::InvalidCertificate {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

    let mut names = Vec::new();
    if let Some(cn) = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
    {
        names.push(cn.to_string());
    }
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for general_name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = general_name {
                if !names.iter().any(|n| n == dns) {
                    names.push((*dns).to_string());
                }
            }
        }
    }

    Ok(CertificateInfo {
        names,
        not_after: cert.validity().not_after.timestamp(),
    })
}

/// Verifies that one of the `ca_ders` signed `leaf_der`.
///
/// # Errors
///
/// Returns [`CertificateError::CaVerificationFailed`] when no CA verifies the leaf.
pub fn verify_with_ca(key: &str, leaf_der: &[u8], ca_ders: &[Vec<u8>]) -> Result<(), CertificateError> {
    let (_, leaf) =
        X509Certificate::from_der(leaf_der).map_err(|e| CertificateError::InvalidCertificate {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

    let mut last_reason = "empty CA bundle".to_string();
    for ca_der in ca_ders {
        let (_, ca) =
            X509Certificate::from_der(ca_der).map_err(|e| CertificateError::InvalidCertificate {
                key: key.to_string(),
                reason: format!("CA: {e}"),
            })?;
        match leaf.verify_signature(Some(ca.public_key())) {
            Ok(()) => return Ok(()),
            Err(e) => last_reason = e.to_string(),
        }
    }

    Err(CertificateError::CaVerificationFailed {
        key: key.to_string(),
        reason: last_reason,
    })
}

/// Generates a self-signed certificate and key (PEM) for `names`.
///
/// # Errors
///
/// Returns [`CertificateError::Generation`] if key or certificate generation fails.
pub fn generate_self_signed(names: &[&str]) -> Result<(String, String), CertificateError> {
    let generation = |e: rcgen::Error| CertificateError::Generation {
        reason: e.to_string(),
    };
    let key_pair = KeyPair::generate().map_err(generation)?;
    let mut params = CertificateParams::new(
        names.iter().map(|n| (*n).to_string()).collect::<Vec<_>>(),
    )
    .map_err(generation)?;
    params
        .distinguished_name
        .push(DnType::CommonName, FAKE_CERTIFICATE_CN);
    let cert = params.self_signed(&key_pair).map_err(generation)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// Writes `content` to `path` through a temporary file and a rename.
///
/// # Errors
///
/// Returns [`CertificateError::Persist`] on any I/O failure.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), CertificateError> {
    write_all_atomic(&[(path, content)]).await
}

/// Writes several files so that none is replaced unless all of them could be staged.
///
/// Every file is first written to a temporary sibling. Only when all temporaries
/// exist are they renamed over their targets; on a staging failure the temporaries
/// already written are removed and the targets are left untouched.
///
/// # Errors
///
/// Returns [`CertificateError::Persist`] on any I/O failure.
pub async fn write_all_atomic(files: &[(&Path, &[u8])]) -> Result<(), CertificateError> {
    let mut staged = Vec::with_capacity(files.len());
    for (path, content) in files {
        match stage(path, content).await {
            Ok(tmp) => staged.push((tmp, *path)),
            Err(e) => {
                for (tmp, _) in &staged {
                    let _ = tokio::fs::remove_file(tmp).await;
                }
                return Err(e);
            }
        }
    }
    for (tmp, path) in &staged {
        tokio::fs::rename(tmp, path)
            .await
            .map_err(|e| persist_error(path, &e))?;
    }
    Ok(())
}

async fn stage(path: &Path, content: &[u8]) -> Result<PathBuf, CertificateError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| persist_error(path, &e))?;
    }
    let tmp = path.with_extension("pem.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| persist_error(path, &e))?;
    Ok(tmp)
}

fn persist_error(path: &Path, e: &std::io::Error) -> CertificateError {
    CertificateError::Persist {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
