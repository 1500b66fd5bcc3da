// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for lifecycle operations.

use thiserror::Error;

/// Result type using RuntimeError.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors from the stem and leaf lifecycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// A catalog operation failed.
    #[error("catalog error: {0}")]
    Catalog(#[from] herbarium_core::CatalogError),

    /// An HAProxy operation failed.
    #[error("haproxy error: {0}")]
    Haproxy(#[from] herbarium_haproxy::HaproxyError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] herbarium_core::config::ConfigError),

    /// The stem configuration cannot be acted on.
    #[error("invalid stem config: {0}")]
    BadConfig(String),

    /// The port scan found no bindable port.
    #[error("no free port found scanning from {0}")]
    NoFreePort(u16),

    /// The readiness gate timed out.
    #[error("leaf '{leaf_id}' did not become ready within {timeout_secs}s")]
    NotReady {
        /// The leaf that failed to come up.
        leaf_id: String,
        /// The gate's timeout in seconds.
        timeout_secs: u64,
    },

    /// The graft node failed to proxy a request.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// A file, process or network operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
