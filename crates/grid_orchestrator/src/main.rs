mod config;
mod metrics;
mod record;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::record::GridRecord;
use anyhow::Context;
use clap::Parser;
use grid_worker::{spawn_grid_worker, GridBackend, GridContext, HttpGridBackend, MemoryGridBackend};
use gridcore::{GridLayout, MultiGridInfo};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

/// Edge render requests sent in parallel by the demo session.
const EDGE_RENDER_CHUNKS: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::parse();
    tracing::info!(config = ?config, "Loaded configuration");

    let context = GridContext {
        src_cs: config.src_cs.clone(),
        target_cs: config.target_cs.clone(),
        bbox: config.bbox,
        rules: config.rules.0.clone(),
    };

    let backend: Arc<dyn GridBackend> = match &config.backend_url {
        Some(url) => Arc::new(
            HttpGridBackend::new(url.as_str(), config.backend_timeout()).context("Failed to build grid store client")?,
        ),
        None => {
            let layout = GridLayout::new(&context.rules).context("Invalid subdivision rules")?;
            tracing::warn!("GRID_BACKEND_URL not set, keeping the grid population in memory");
            Arc::new(MemoryGridBackend::new(layout))
        }
    };

    let metrics = Arc::new(Metrics::new().context("Failed to create metrics registry")?);

    let worker = spawn_grid_worker(config.worker_name.clone(), backend).context("Failed to spawn grid worker")?;
    worker.ready().await.context("Grid worker did not become ready")?;

    let (mut record, loaded) = GridRecord::init(worker, context, metrics.clone(), config.max_cells)
        .await
        .context("Failed to load grid population")?;
    tracing::info!(
        cells = loaded.len(),
        max_level = record.max_level(),
        "Grid population loaded"
    );

    if config.demo {
        demo_session(&mut record).await.context("Demo session failed")?;
    }

    // Spawn the metrics server
    let metrics_handle = {
        let router = metrics.router();
        let addr = config.metrics_listen_addr;
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            Ok::<(), anyhow::Error>(())
        })
    };

    tracing::info!(addr = %config.metrics_listen_addr, "All services started. Awaiting shutdown signal...");

    match metrics_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Metrics server failed."),
        Err(e) => tracing::error!(error = %e, "Metrics server task failed."),
    }

    tracing::info!(cells = record.grid_num(), "Shutdown signal received. Releasing grid worker...");
    // Dropping the record drops the dispatcher, which closes the worker context.
    drop(record);

    tracing::info!("Orchestrator shut down gracefully.");
    Ok(())
}

/// Subdivides the first active cell, merges it back, then computes the
/// topology of the result and its edge geometry.
async fn demo_session(record: &mut GridRecord) -> anyhow::Result<()> {
    let Some(target) = (0..record.grid_num() as u32).find(|&sid| {
        !record.is_deleted(sid) && record.grid_info(sid).is_some_and(|(level, _)| level < record.max_level())
    }) else {
        tracing::info!("No subdividable cell, skipping demo session");
        return Ok(());
    };

    let parent = record.check_grid(target)?;
    let mut cells = MultiGridInfo::default();
    cells.push(parent.level, parent.global_id);

    let sub = record.subdivide(&cells).await?;
    record.delete_grid_locally(target)?;
    tracing::info!(
        parent = ?parent,
        children = sub.children.len(),
        cells = record.grid_num(),
        "Subdivided"
    );

    let topology = record.parse_topology().await?;
    let (vertices, _) = record.edge_render_infos(&topology.edge_keys, EDGE_RENDER_CHUNKS).await?;
    tracing::info!(edges = topology.edge_keys.len(), floats = vertices.len(), "Topology parsed");

    let first_child = record
        .storage_id_of(sub.children.levels[0], sub.children.global_ids[0])
        .context("Subdivided child missing from record")?;
    let merged = record.merge(&[first_child]).await?;
    record.delete_grids_locally(&merged.child_storage_ids)?;
    let parents = MultiGridInfo::new(merged.parents.levels.clone(), merged.parents.global_ids.clone())?;
    record.add_grids(&parents, &merged.parents.deleted)?;
    tracing::info!(parents = parents.len(), cells = record.grid_num(), "Merged back");

    let saved = record.save().await?;
    tracing::info!(success = saved.success, message = %saved.message, "Saved");
    Ok(())
}

/// Listens for OS shutdown signals (SIGINT, SIGTERM) and resolves when one is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
