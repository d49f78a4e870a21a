// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backend adapter contract.
//!
//! A backend turns a [`Configuration`] into whatever its proxy consumes and
//! activates it. The Sync Engine only ever talks to the [`ProxyBackend`] trait.
//! [`JsonFileBackend`] is the reference adapter: it renders the model as JSON and
//! "activates" it by replacing a file on disk.

use crate::defaults::BackendDefaults;
use crate::model::Configuration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of a successful [`ProxyBackend::reload`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// New configuration is active; carries the backend's output
    Reloaded(String),
    /// Rendered bytes equal the active configuration, nothing was done
    Unchanged,
}

impl ReloadOutcome {
    /// Metrics label of the outcome.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reloaded(_) => "reloaded",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Identification reported by a backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    pub name: String,
    pub release: String,
    pub build: String,
    pub repository: String,
}

impl std::fmt::Display for BackendInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (release {}, build {}, repository {})",
            self.name, self.release, self.build, self.repository
        )
    }
}

/// Operations a proxy backend provides to the reconciliation core.
#[async_trait]
pub trait ProxyBackend: Send + Sync {
    /// Baseline feature values applied when a rule carries no annotation.
    fn backend_defaults(&self) -> BackendDefaults;

    /// Renders `config` with the controller-wide `defaults`.
    ///
    /// Must not activate anything; temporary validation files are allowed.
    async fn on_update(&self, defaults: &BackendDefaults, config: &Configuration) -> Result<Vec<u8>>;

    /// Activates rendered bytes. Idempotent: identical bytes yield
    /// [`ReloadOutcome::Unchanged`].
    async fn reload(&self, rendered: &[u8]) -> Result<ReloadOutcome>;

    fn info(&self) -> BackendInfo;

    /// Liveness of the backend.
    async fn check(&self) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Rendered<'a> {
    defaults: &'a BackendDefaults,
    configuration: &'a Configuration,
}

/// Writes the configuration as pretty-printed JSON to a file.
#[derive(Clone, Debug)]
pub struct JsonFileBackend {
    output: PathBuf,
}

impl JsonFileBackend {
    #[must_use]
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    #[must_use]
    pub fn output(&self) -> &Path {
        &self.output
    }
}

#[async_trait]
impl ProxyBackend for JsonFileBackend {
    fn backend_defaults(&self) -> BackendDefaults {
        BackendDefaults::default()
    }

    async fn on_update(&self, defaults: &BackendDefaults, config: &Configuration) -> Result<Vec<u8>> {
        let mut rendered = serde_json::to_vec_pretty(&Rendered {
            defaults,
            configuration: config,
        })
        .context("Failed to serialize configuration")?;
        rendered.push(b'\n');
        Ok(rendered)
    }

    async fn reload(&self, rendered: &[u8]) -> Result<ReloadOutcome> {
        match tokio::fs::read(&self.output).await {
            Ok(current) if current == rendered => {
                debug!(path = %self.output.display(), "Configuration file is up to date");
                return Ok(ReloadOutcome::Unchanged);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.output.display()));
            }
        }

        if let Some(parent) = self.output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.output.with_extension("json.tmp");
        tokio::fs::write(&tmp, rendered)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.output)
            .await
            .with_context(|| format!("Failed to replace {}", self.output.display()))?;

        info!(path = %self.output.display(), bytes = rendered.len(), "Configuration file replaced");
        Ok(ReloadOutcome::Reloaded(format!(
            "wrote {} bytes to {}",
            rendered.len(),
            self.output.display()
        )))
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "json-file".to_string(),
            release: env!("CARGO_PKG_VERSION").to_string(),
            build: option_env!("GIT_SHA").unwrap_or("unknown").to_string(),
            repository: option_env!("CARGO_PKG_REPOSITORY")
                .filter(|r| !r.is_empty())
                .unwrap_or("unknown")
                .to_string(),
        }
    }

    async fn check(&self) -> Result<()> {
        let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        match tokio::fs::metadata(parent).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => anyhow::bail!("{} is not a directory", parent.display()),
            // Created on the first reload
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Cannot access {}", parent.display())),
        }
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod backend_tests;
