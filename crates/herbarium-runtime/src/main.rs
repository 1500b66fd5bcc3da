// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Herbarium - request-gated serverless runtime
//!
//! Loads the global configuration, wires the HAProxy client, catalog,
//! repositories and managers, registers every configured service and then
//! blocks until a termination signal arrives.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use herbarium_core::{Catalog, GlobalConfig, LeafRepository, StemRepository};
use herbarium_haproxy::{DataplaneClient, HaproxyClient, HaproxyConfig};
use herbarium_runtime::{LeafManager, PlatformManager, RuntimeSettings, StemManager};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("herbarium=info".parse().unwrap()),
        )
        .init();

    info!("Starting Herbarium");

    let config = GlobalConfig::load().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        root_folder = %config.plantarium.root_folder,
        log_folder = %config.log_folder().display(),
        haproxy_url = %config.haproxy.url,
        "Configuration loaded"
    );

    let dataplane = Arc::new(DataplaneClient::new(HaproxyConfig {
        api_url: config.haproxy.url.clone(),
        login: config.haproxy.login.clone(),
        password: config.haproxy.password.clone(),
    }));
    let balancer = Arc::new(HaproxyClient::new(dataplane));

    let catalog = Arc::new(Catalog::new());
    let stem_repo = StemRepository::new(catalog.clone());
    let leaf_repo = LeafRepository::new(catalog);

    let settings = RuntimeSettings::from_config(&config);
    let leaf_manager = LeafManager::new(
        leaf_repo,
        stem_repo.clone(),
        balancer.clone(),
        settings.clone(),
    );
    let stem_manager = Arc::new(StemManager::new(
        stem_repo,
        Arc::new(leaf_manager),
        balancer,
    ));

    let platform = PlatformManager::new(stem_manager, settings.root_folder.clone());
    platform.initialize_platform().await?;

    info!("Herbarium initialized, waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    if let Err(err) = platform.stop_platform().await {
        error!("Shutdown finished with errors: {}", err);
    }

    info!("Shutdown complete");
    Ok(())
}
