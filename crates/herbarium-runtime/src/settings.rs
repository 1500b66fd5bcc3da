// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime settings the lifecycle verbs operate with.

use std::path::PathBuf;

use herbarium_core::GlobalConfig;

/// First port tried when allocating a leaf port.
pub const DEFAULT_BASE_PORT: u16 = 8000;

/// Folders and port base shared by the lifecycle managers.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Root folder holding `system/` and `services/`.
    pub root_folder: PathBuf,
    /// Folder receiving one `<leaf-id>.log` per leaf.
    pub log_folder: PathBuf,
    /// First port tried by the port scan.
    pub base_port: u16,
}

impl RuntimeSettings {
    /// Settings with the default port base.
    pub fn new(root_folder: impl Into<PathBuf>, log_folder: impl Into<PathBuf>) -> Self {
        Self {
            root_folder: root_folder.into(),
            log_folder: log_folder.into(),
            base_port: DEFAULT_BASE_PORT,
        }
    }

    /// Settings derived from the global configuration.
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(
            PathBuf::from(&config.plantarium.root_folder),
            config.log_folder(),
        )
    }

    /// Override the port scan base.
    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }
}
