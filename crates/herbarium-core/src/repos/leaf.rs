// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leaf repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::catalog::{stem_mut, stem_ref, Catalog};
use crate::error::{CatalogError, Result};
use crate::models::{Leaf, LeafStatus, StemKey};

/// Typed operations on the leaves of a stem, all keyed by [`StemKey`].
#[derive(Debug, Clone)]
pub struct LeafRepository {
    catalog: Arc<Catalog>,
}

impl LeafRepository {
    /// Create a repository over the given catalog.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Add a leaf to a stem with status `Running`.
    ///
    /// Fails if the stem is missing or the leaf ID collides.
    pub fn add_leaf(
        &self,
        key: &StemKey,
        leaf_id: &str,
        haproxy_server: &str,
        pid: u32,
        port: u16,
        initialized: DateTime<Utc>,
    ) -> Result<()> {
        self.catalog.with_write(|stems| {
            let stem = stem_mut(stems, key)?;
            if stem.leaf_instances.contains_key(leaf_id) {
                return Err(CatalogError::LeafAlreadyExists {
                    leaf_id: leaf_id.to_string(),
                    name: key.name.clone(),
                    version: key.version.clone(),
                });
            }
            stem.leaf_instances.insert(
                leaf_id.to_string(),
                Leaf {
                    id: leaf_id.to_string(),
                    pid,
                    haproxy_server: haproxy_server.to_string(),
                    port,
                    status: LeafStatus::Running,
                    initialized,
                },
            );
            Ok(())
        })
    }

    /// Remove a leaf from a stem.
    pub fn remove_leaf(&self, key: &StemKey, leaf_id: &str) -> Result<()> {
        self.catalog.with_write(|stems| {
            let stem = stem_mut(stems, key)?;
            if stem.leaf_instances.remove(leaf_id).is_none() {
                return Err(CatalogError::LeafNotFound {
                    leaf_id: leaf_id.to_string(),
                    name: key.name.clone(),
                    version: key.version.clone(),
                });
            }
            Ok(())
        })
    }

    /// Find a leaf by its ID within a stem.
    pub fn find_leaf(&self, key: &StemKey, leaf_id: &str) -> Result<Leaf> {
        self.catalog.with_read(|stems| {
            let stem = stem_ref(stems, key)?;
            stem.leaf_instances
                .get(leaf_id)
                .cloned()
                .ok_or_else(|| CatalogError::LeafNotFound {
                    leaf_id: leaf_id.to_string(),
                    name: key.name.clone(),
                    version: key.version.clone(),
                })
        })
    }

    /// List all leaves of a stem, in arbitrary order.
    pub fn list_leaves(&self, key: &StemKey) -> Result<Vec<Leaf>> {
        self.catalog.with_read(|stems| {
            let stem = stem_ref(stems, key)?;
            Ok(stem.leaf_instances.values().cloned().collect())
        })
    }

    /// Update the status of a leaf.
    pub fn update_leaf_status(
        &self,
        key: &StemKey,
        leaf_id: &str,
        status: LeafStatus,
    ) -> Result<()> {
        self.catalog.with_write(|stems| {
            let stem = stem_mut(stems, key)?;
            let leaf =
                stem.leaf_instances
                    .get_mut(leaf_id)
                    .ok_or_else(|| CatalogError::LeafNotFound {
                        leaf_id: leaf_id.to_string(),
                        name: key.name.clone(),
                        version: key.version.clone(),
                    })?;
            leaf.status = status;
            Ok(())
        })
    }

    /// Install the graft-node placeholder on a stem.
    pub fn set_graft_node(&self, key: &StemKey, graft_node: Leaf) -> Result<()> {
        self.catalog.with_write(|stems| {
            let stem = stem_mut(stems, key)?;
            stem.graft_node_leaf = Some(graft_node);
            Ok(())
        })
    }

    /// The stem's graft node, if one is installed.
    pub fn graft_node(&self, key: &StemKey) -> Result<Option<Leaf>> {
        self.catalog.with_read(|stems| {
            let stem = stem_ref(stems, key)?;
            Ok(stem.graft_node_leaf.clone())
        })
    }

    /// Remove the graft-node placeholder from a stem.
    pub fn clear_graft_node(&self, key: &StemKey) -> Result<()> {
        self.catalog.with_write(|stems| {
            let stem = stem_mut(stems, key)?;
            stem.graft_node_leaf = None;
            Ok(())
        })
    }
}
