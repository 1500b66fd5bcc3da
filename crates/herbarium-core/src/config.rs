// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading.
//!
//! The platform reads one global config from
//! `<root>/system/herbarium/config.yaml` and one `config.yaml` per service.
//! Deployment services point at their active version through a `current`
//! entry that is either a symlink or a plain file containing a relative path.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::{GlobalConfig, StemConfig};

/// Environment variable holding the platform root folder. Required.
pub const ROOT_FOLDER_ENV: &str = "PLANTARIUM_ROOT_FOLDER";

/// Environment variable overriding the log folder. Defaults to `.`.
pub const LOG_FOLDER_ENV: &str = "PLANTARIUM_LOG_FOLDER";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// A configuration file could not be read.
    #[error("failed to read config at {path}: {source}")]
    Read {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// The `current` entry of a service could not be resolved.
    #[error("failed to resolve current version for service '{service}': {reason}")]
    CurrentVersion {
        /// Service directory name.
        service: String,
        /// Why resolution failed.
        reason: String,
    },
}

impl GlobalConfig {
    /// Load the global configuration.
    ///
    /// `PLANTARIUM_ROOT_FOLDER` must be set; the config file is read from
    /// `<root>/system/herbarium/config.yaml`. The environment value replaces
    /// `plantarium.root_folder`, and `PLANTARIUM_LOG_FOLDER` replaces
    /// `plantarium.log_folder` (defaulting to `.` when both are unset).
    pub fn load() -> Result<Self, ConfigError> {
        let root = std::env::var(ROOT_FOLDER_ENV)
            .map_err(|_| ConfigError::MissingEnvVar(ROOT_FOLDER_ENV))?;
        let mut config = Self::load_from(Path::new(&root))?;
        config.plantarium.root_folder = root;
        if let Ok(log_folder) = std::env::var(LOG_FOLDER_ENV) {
            config.plantarium.log_folder = Some(log_folder);
        }
        if config.plantarium.log_folder.is_none() {
            config.plantarium.log_folder = Some(".".to_string());
        }
        debug!(
            root_folder = %config.plantarium.root_folder,
            "global configuration loaded"
        );
        Ok(config)
    }

    /// Load the global configuration from an explicit root folder, without
    /// consulting the environment.
    pub fn load_from(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join("system").join("herbarium").join("config.yaml");
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    /// The effective log folder, falling back to `.`.
    pub fn log_folder(&self) -> PathBuf {
        PathBuf::from(
            self.plantarium
                .log_folder
                .as_deref()
                .unwrap_or("."),
        )
    }
}

/// Parse a single service `config.yaml` into a [`StemConfig`].
pub fn load_stem_config(path: &Path) -> Result<StemConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the active version directory of a deployment service.
///
/// `<base>/<service>/current` is either a symlink to the version directory or
/// a plain file whose contents are a path relative to the service directory.
pub fn resolve_current_path(base: &Path, service: &str) -> Result<PathBuf, ConfigError> {
    let current = base.join(service).join("current");
    let metadata =
        std::fs::symlink_metadata(&current).map_err(|e| ConfigError::CurrentVersion {
            service: service.to_string(),
            reason: format!("cannot stat {}: {}", current.display(), e),
        })?;

    if metadata.file_type().is_symlink() {
        return current
            .canonicalize()
            .map_err(|e| ConfigError::CurrentVersion {
                service: service.to_string(),
                reason: format!("cannot resolve symlink {}: {}", current.display(), e),
            });
    }

    // Plain-file format: the file holds a relative path to the version dir.
    let target = std::fs::read_to_string(&current).map_err(|e| ConfigError::CurrentVersion {
        service: service.to_string(),
        reason: format!("cannot read {}: {}", current.display(), e),
    })?;
    Ok(base.join(service).join(target.trim()))
}
