// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use ingress_core::{
    backend::{JsonFileBackend, ProxyBackend},
    builder::{Builder, BuilderSettings},
    cluster::KubeClusterClient,
    config::ControllerConfig,
    constants::{SYNC_QUEUE_ITEM, TOKIO_WORKER_THREADS},
    context::{process_secret, reflect, Caches, EventRouter, Writers},
    health,
    queue::TaskQueue,
    ssl::{CertificateTracker, SecretSynchronizer},
    status::{LeaderElector, LeaseElector, LeaseSettings, StaticElector, StatusSettings, StatusSync},
    sync::SyncEngine,
};
use kube::{Api, Client, Resource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Time allowed for Status Sync to clear addresses on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    let config = ControllerConfig::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("ingress-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

/// Initializes logging.
///
/// Respects `RUST_LOG` (default `info`) and `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(config: ControllerConfig) -> Result<()> {
    init_tracing();
    config.validate()?;

    info!("Starting ingress controller");
    debug!(config = ?config, "Configuration loaded");

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    debug!("Kubernetes client initialized successfully");

    let (caches, writers) = Caches::new();
    let class_filter = config.class_filter();
    let tracker = Arc::new(CertificateTracker::new());
    let cluster = Arc::new(KubeClusterClient::new(client.clone()));

    let synchronizer = Arc::new(SecretSynchronizer::new(
        caches.secrets.clone(),
        caches.ingresses.clone(),
        tracker.clone(),
        class_filter.clone(),
        config.ssl_directory.clone(),
        config.default_ssl_certificate.clone(),
    ));

    let backend: Arc<dyn ProxyBackend> = Arc::new(JsonFileBackend::new(config.config_output.clone()));
    info!(backend = %backend.info(), "Proxy backend selected");

    let builder = Builder::new(
        caches.services.clone(),
        caches.endpoints.clone(),
        caches.secrets.clone(),
        caches.configmaps.clone(),
        tracker,
        cluster.clone(),
        BuilderSettings::from_config(&config),
    );
    let engine = Arc::new(SyncEngine::new(
        builder,
        backend.clone(),
        synchronizer.clone(),
        caches.ingresses.clone(),
        caches.configmaps.clone(),
        config.configmap.clone(),
    ));

    let rebuild = TaskQueue::<String>::new("rebuild");
    let secret_queue = TaskQueue::<String>::new("secrets");

    let watched_configmaps = [
        config.configmap.clone(),
        config.tcp_services_configmap.clone(),
        config.udp_services_configmap.clone(),
    ]
    .into_iter()
    .flatten();
    let mut router = EventRouter::new(rebuild.clone(), secret_queue.clone(), watched_configmaps);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut lease = None;
    let mut status_task = None;
    if config.update_status {
        let elector: Arc<dyn LeaderElector> = match (&config.pod_name, &config.pod_namespace) {
            (Some(_), Some(_)) => {
                let settings = LeaseSettings::new(
                    config.election_id.clone(),
                    config.lease_namespace(),
                    config.identity(),
                );
                let elector = Arc::new(LeaseElector::start(client.clone(), settings).await?);
                lease = Some(elector.clone());
                elector
            }
            _ => {
                warn!("POD_NAME or POD_NAMESPACE not set, running status updates without leader election");
                Arc::new(StaticElector::new(true))
            }
        };
        let status = Arc::new(StatusSync::new(
            cluster,
            caches.ingresses.clone(),
            elector,
            StatusSettings {
                publish_service: config.publish_service.clone(),
                pod_name: config.pod_name.clone(),
                pod_namespace: config.pod_namespace.clone(),
                update_status_on_shutdown: config.update_status_on_shutdown,
                interval: config.status_update_interval(),
                class_filter,
            },
        ));
        router = router.with_status(status.clone());
        status_task = Some(tokio::spawn(status.run(config.identity(), shutdown_rx.clone())));
    } else {
        info!("Ingress status updates disabled");
    }
    let router = Arc::new(router);

    let health_task = tokio::spawn(health::serve(
        config.health_port,
        backend,
        shutdown_rx.clone(),
    ));

    info!("Starting reflectors and workers");

    // Workers should never exit - if one does, we log it and exit the main process
    tokio::select! {
        result = run_reflectors(client, config.watch_namespace.as_deref(), writers, caches.clone(), router.clone()) => {
            error!("CRITICAL: Reflectors exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Reflectors exited unexpectedly without error")
        }
        () = rebuild.clone().run(|_item| {
            let engine = engine.clone();
            async move { engine.sync().await }
        }) => {
            error!("CRITICAL: Sync worker exited unexpectedly");
        }
        () = secret_queue.clone().run(|key| {
            let synchronizer = synchronizer.clone();
            let secrets = caches.secrets.clone();
            let rebuild = rebuild.clone();
            async move { process_secret(&synchronizer, secrets.as_ref(), &rebuild, &key).await }
        }) => {
            error!("CRITICAL: Secret worker exited unexpectedly");
        }
        () = resync(router.clone(), config.sync_period()) => {
            error!("CRITICAL: Resync loop exited unexpectedly");
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Stopping ingress controller");
    rebuild.shutdown();
    secret_queue.shutdown();
    let _ = shutdown_tx.send(true);

    if let Some(task) = status_task {
        match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Status sync task failed"),
            Err(_) => warn!("Status sync did not stop in time"),
        }
    }
    drop(router);

    if let Some(elector) = lease {
        match Arc::try_unwrap(elector) {
            Ok(elector) => elector.release().await,
            Err(_) => warn!("Lease still in use, leaving it to expire"),
        }
    }

    match health_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Health server stopped with an error"),
        Err(e) => warn!(error = %e, "Health server task failed"),
    }

    info!("Ingress controller stopped");
    Ok(())
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Runs one reflector per watched kind.
async fn run_reflectors(
    client: Client,
    namespace: Option<&str>,
    writers: Writers,
    caches: Caches,
    router: Arc<EventRouter>,
) -> Result<()> {
    let Writers {
        ingresses,
        services,
        endpoints,
        secrets,
        configmaps,
    } = writers;

    let r = router.clone();
    let ingress_reflector = reflect(api(&client, namespace), ingresses, caches.ingresses, move |obj, change| {
        r.ingress_changed(obj, change);
    });
    let r = router.clone();
    let service_reflector = reflect(api(&client, namespace), services, caches.services, move |obj, change| {
        r.service_changed(obj, change);
    });
    let r = router.clone();
    let endpoints_reflector = reflect(api(&client, namespace), endpoints, caches.endpoints, move |obj, change| {
        r.endpoints_changed(obj, change);
    });
    let r = router.clone();
    let secret_reflector = reflect(api(&client, namespace), secrets, caches.secrets, move |obj, change| {
        r.secret_changed(obj, change);
    });
    let configmap_reflector = reflect(api(&client, namespace), configmaps, caches.configmaps, move |obj, change| {
        router.configmap_changed(obj, change);
    });

    tokio::join!(
        ingress_reflector,
        service_reflector,
        endpoints_reflector,
        secret_reflector,
        configmap_reflector,
    );
    Ok(())
}

/// Requests a full rebuild every `period`.
async fn resync(router: Arc<EventRouter>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        debug!(item = SYNC_QUEUE_ITEM, "Periodic resync");
        router.request_rebuild();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
