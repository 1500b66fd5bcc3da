// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration discovery and platform startup/shutdown.
//!
//! System components live directly under `<root>/system/<name>/config.yaml`;
//! deployment services under `<root>/services/<name>/current/config.yaml`,
//! where `current` points at the active version directory. The `herbarium`
//! directory under `system/` holds the global config and is not a component.

use std::path::PathBuf;
use std::sync::Arc;

use herbarium_core::config::{load_stem_config, resolve_current_path};
use herbarium_core::models::{StemConfig, StemType};
use tracing::{debug, error, info, warn};

use crate::error::{Result, RuntimeError};
use crate::stem_manager::StemLifecycle;

/// A service discovered on disk, ready for registration.
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    /// Parsed configuration.
    pub config: StemConfig,
    /// The version directory the config was read from.
    pub version_dir: PathBuf,
    /// Which directory tree the service came from.
    pub stem_type: StemType,
}

/// Discovers service configurations and drives platform startup/shutdown.
pub struct PlatformManager {
    stems: Arc<dyn StemLifecycle>,
    base_path: PathBuf,
}

impl PlatformManager {
    /// Create a manager registering stems through the given lifecycle.
    pub fn new(stems: Arc<dyn StemLifecycle>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            stems,
            base_path: base_path.into(),
        }
    }

    /// Register every system component and deployment service found under
    /// the base path. The first registration failure aborts initialization.
    pub async fn initialize_platform(&self) -> Result<()> {
        info!("initializing platform");

        let (system, deployments) = self.service_configurations()?;
        for service in system.iter().chain(deployments.iter()) {
            info!(
                name = %service.config.name,
                version = %service.config.version,
                kind = ?service.stem_type,
                "registering stem"
            );
            if let Err(err) = self.stems.register_stem(service.config.clone()).await {
                error!(name = %service.config.name, error = %err, "failed to register stem");
                return Err(err);
            }
        }

        info!("platform initialized");
        Ok(())
    }

    /// Unregister every stem in the catalog, aggregating the first error.
    pub async fn stop_platform(&self) -> Result<()> {
        info!("stopping platform");

        let mut first_error: Option<RuntimeError> = None;
        for stem in self.stems.list_stems()? {
            let key = stem.key();
            if let Err(err) = self.stems.unregister_stem(&key).await {
                error!(stem = %key, error = %err, "failed to unregister stem");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("platform stopped");
                Ok(())
            }
        }
    }

    /// Read all service configurations: system components first, then
    /// deployment services. Unreadable entries are logged and skipped.
    pub fn service_configurations(
        &self,
    ) -> Result<(Vec<DiscoveredService>, Vec<DiscoveredService>)> {
        let mut system = Vec::new();
        let system_path = self.base_path.join("system");
        debug!(path = %system_path.display(), "scanning system components");
        for entry in std::fs::read_dir(&system_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "herbarium" {
                // The platform's own config folder, not a component.
                continue;
            }
            match load_stem_config(&entry.path().join("config.yaml")) {
                Ok(config) => system.push(DiscoveredService {
                    config,
                    version_dir: entry.path(),
                    stem_type: StemType::System,
                }),
                Err(err) => {
                    warn!(service = %name, error = %err, "skipping system component");
                }
            }
        }

        let mut deployments = Vec::new();
        let services_path = self.base_path.join("services");
        debug!(path = %services_path.display(), "scanning deployment services");
        for entry in std::fs::read_dir(&services_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let current = match resolve_current_path(&services_path, &name) {
                Ok(path) => path,
                Err(err) => {
                    warn!(service = %name, error = %err, "skipping deployment service");
                    continue;
                }
            };
            match load_stem_config(&current.join("config.yaml")) {
                Ok(config) => deployments.push(DiscoveredService {
                    config,
                    version_dir: current,
                    stem_type: StemType::Deployment,
                }),
                Err(err) => {
                    warn!(service = %name, error = %err, "skipping deployment service");
                }
            }
        }

        info!(
            system = system.len(),
            deployments = deployments.len(),
            "service configurations loaded"
        );
        Ok((system, deployments))
    }
}
