// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # ingress-core - Reconciliation core of a Kubernetes ingress controller
//!
//! Watches `Ingress`, `Service`, `Endpoints`, `Secret` and `ConfigMap` objects and
//! turns them into a deterministic, backend-agnostic routing model that a proxy
//! backend renders and reloads.
//!
//! ## Overview
//!
//! - Reflector caches feed an event router that collapses changes into rebuild
//!   requests on a single-worker queue.
//! - The [`sync::SyncEngine`] builds a [`model::Configuration`] per pass and hands
//!   it to a [`backend::ProxyBackend`] only when it changed.
//! - Referenced TLS secrets are persisted to disk and tracked by fingerprint.
//! - The leader publishes the controller's addresses on every managed `Ingress`.
//!
//! ## Modules
//!
//! - [`annotations`] - Per-rule annotation parsers and class filtering
//! - [`builder`] - Backend Model Builder
//! - [`sync`] - Sync Engine
//! - [`ssl`] - Certificate tracking and secret synchronization
//! - [`status`] - Status Sync and leader election
//! - [`context`] - Caches, reflectors and event routing
//! - [`backend`] - Proxy backend seam and the JSON reference backend
//!
//! ## Example
//!
//! ```rust,no_run
//! use ingress_core::model::{Configuration, Endpoint};
//!
//! let endpoint = Endpoint {
//!     address: "10.0.0.1".to_string(),
//!     port: "8080".to_string(),
//!     max_fails: 0,
//!     fail_timeout: 0,
//! };
//! let config = Configuration::default();
//! assert!(config.backends.is_empty());
//! # let _ = endpoint;
//! ```

pub mod annotations;
pub mod backend;
pub mod builder;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod context;
pub mod defaults;
pub mod errors;
pub mod health;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod selector;
pub mod ssl;
pub mod status;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;
