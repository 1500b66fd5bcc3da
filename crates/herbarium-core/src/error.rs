// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for catalog operations.

use thiserror::Error;

/// Result type using CatalogError.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors raised by the catalog repositories.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// The requested stem is not registered.
    #[error("stem '{name}' version '{version}' not found")]
    StemNotFound {
        /// Stem name.
        name: String,
        /// Stem version.
        version: String,
    },

    /// A stem with the same key already exists.
    #[error("stem '{name}' version '{version}' already exists")]
    StemAlreadyExists {
        /// Stem name.
        name: String,
        /// Stem version.
        version: String,
    },

    /// The requested leaf is not part of the stem.
    #[error("leaf '{leaf_id}' not found in stem '{name}' version '{version}'")]
    LeafNotFound {
        /// Leaf ID.
        leaf_id: String,
        /// Stem name.
        name: String,
        /// Stem version.
        version: String,
    },

    /// A leaf with the same ID already exists in the stem.
    #[error("leaf '{leaf_id}' already exists in stem '{name}' version '{version}'")]
    LeafAlreadyExists {
        /// Leaf ID.
        leaf_id: String,
        /// Stem name.
        name: String,
        /// Stem version.
        version: String,
    },

    /// The stem already carries a graft node.
    #[error("graft node for stem '{name}' version '{version}' already exists")]
    GraftNodeAlreadyExists {
        /// Stem name.
        name: String,
        /// Stem version.
        version: String,
    },
}

impl CatalogError {
    /// Shorthand for [`CatalogError::StemNotFound`] from a key.
    pub fn stem_not_found(key: &crate::models::StemKey) -> Self {
        CatalogError::StemNotFound {
            name: key.name.clone(),
            version: key.version.clone(),
        }
    }

    /// Whether this error means the addressed entity was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::StemNotFound { .. } | CatalogError::LeafNotFound { .. }
        )
    }
}
