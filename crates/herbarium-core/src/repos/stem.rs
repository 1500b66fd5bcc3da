// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stem repository.

use std::sync::Arc;

use crate::catalog::{stem_mut, stem_ref, Catalog};
use crate::error::{CatalogError, Result};
use crate::models::{Stem, StemConfig, StemKey};

/// Typed operations on registered stems.
#[derive(Debug, Clone)]
pub struct StemRepository {
    catalog: Arc<Catalog>,
}

impl StemRepository {
    /// Create a repository over the given catalog.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Save a new stem. Fails if a stem with the same key is present.
    pub fn save(&self, key: &StemKey, stem: Stem) -> Result<()> {
        self.catalog.with_write(|stems| {
            if stems.contains_key(key) {
                return Err(CatalogError::StemAlreadyExists {
                    name: key.name.clone(),
                    version: key.version.clone(),
                });
            }
            stems.insert(key.clone(), stem);
            Ok(())
        })
    }

    /// Delete a stem. Fails if the key is absent.
    pub fn delete(&self, key: &StemKey) -> Result<()> {
        self.catalog.with_write(|stems| {
            if stems.remove(key).is_none() {
                return Err(CatalogError::stem_not_found(key));
            }
            Ok(())
        })
    }

    /// Fetch a snapshot of a stem. Fails if the key is absent.
    pub fn fetch(&self, key: &StemKey) -> Result<Stem> {
        self.catalog
            .with_read(|stems| stem_ref(stems, key).cloned())
    }

    /// List snapshots of all registered stems, in arbitrary order.
    pub fn list(&self) -> Result<Vec<Stem>> {
        self.catalog
            .with_read(|stems| Ok(stems.values().cloned().collect()))
    }

    /// Replace a stem's version and config, preserving its leaf instances
    /// and environment.
    pub fn update(&self, key: &StemKey, new_version: &str, new_config: StemConfig) -> Result<()> {
        self.catalog.with_write(|stems| {
            let stem = stem_mut(stems, key)?;
            stem.version = new_version.to_string();
            stem.config = new_config;
            Ok(())
        })
    }
}
