// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stem lifecycle.
//!
//! Registering a stem creates its HAProxy backend, records it in the catalog
//! and brings up either the configured minimum instance set or a graft node.
//! Unregistering snapshots the running leaves, stops them in parallel, and
//! tears down the backend members and the record even when individual stops
//! fail.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use herbarium_core::models::{backend_name, Stem, StemConfig, StemKey, StemType};
use herbarium_core::{CatalogError, StemRepository};
use herbarium_haproxy::Balancer;
use tracing::{debug, error, info};

use crate::error::{Result, RuntimeError};
use crate::leaf_manager::LeafLifecycle;

/// Methods for managing stems, mockable at the seam.
#[async_trait]
pub trait StemLifecycle: Send + Sync {
    /// Register a stem and bring up its instances or graft node.
    async fn register_stem(&self, config: StemConfig) -> Result<()>;

    /// Stop a stem's leaves and remove it from HAProxy and the catalog.
    async fn unregister_stem(&self, key: &StemKey) -> Result<()>;

    /// A snapshot of a registered stem.
    fn fetch_stem_info(&self, key: &StemKey) -> Result<Stem>;

    /// Snapshots of all registered stems.
    fn list_stems(&self) -> Result<Vec<Stem>>;
}

/// Manages stems against the catalog and HAProxy.
pub struct StemManager {
    stem_repo: StemRepository,
    leaves: Arc<dyn LeafLifecycle>,
    balancer: Arc<dyn Balancer>,
}

impl StemManager {
    /// Create a manager over the given repository, leaf lifecycle and
    /// balancer.
    pub fn new(
        stem_repo: StemRepository,
        leaves: Arc<dyn LeafLifecycle>,
        balancer: Arc<dyn Balancer>,
    ) -> Self {
        Self {
            stem_repo,
            leaves,
            balancer,
        }
    }
}

#[async_trait]
impl StemLifecycle for StemManager {
    async fn register_stem(&self, config: StemConfig) -> Result<()> {
        info!(
            name = %config.name,
            version = %config.version,
            url = %config.url,
            "registering stem"
        );

        let key = StemKey::new(config.name.clone(), config.version.clone());
        if self.stem_repo.fetch(&key).is_ok() {
            return Err(CatalogError::StemAlreadyExists {
                name: key.name,
                version: key.version,
            }
            .into());
        }

        let backend = backend_name(&config.url);
        self.balancer.bind_stem(&backend).await?;

        let stem = Stem {
            name: config.name.clone(),
            stem_type: StemType::Deployment,
            working_url: config.url.clone(),
            haproxy_backend: backend,
            version: config.version.clone(),
            environment: config.env.clone(),
            leaf_instances: HashMap::new(),
            graft_node_leaf: None,
            config: config.clone(),
        };
        self.stem_repo.save(&key, stem)?;

        match config.min_instances {
            Some(count) if count > 0 => {
                info!(stem = %key, count = count, "starting minimum instance set");
                for _ in 0..count {
                    self.leaves.start_leaf(&key, None).await?;
                }
            }
            Some(_) => {
                debug!(stem = %key, "minimum instances is zero, starting nothing");
            }
            None => {
                self.leaves.start_graft_node(&key).await?;
            }
        }

        info!(stem = %key, "stem registered");
        Ok(())
    }

    async fn unregister_stem(&self, key: &StemKey) -> Result<()> {
        let stem = self.stem_repo.fetch(key)?;
        let running = self.leaves.running_leaves(key)?;

        // Snapshot-then-stop: every leaf in the snapshot is stopped in
        // parallel; the first error is recorded but does not stop the rest
        // of the teardown.
        let mut handles = Vec::with_capacity(running.len());
        for leaf in &running {
            let lifecycle = self.leaves.clone();
            let key = key.clone();
            let leaf_id = leaf.id.clone();
            handles.push(tokio::spawn(async move {
                lifecycle.stop_leaf(&key, &leaf_id).await
            }));
        }

        let mut first_error: Option<RuntimeError> = None;
        for joined in futures::future::join_all(handles).await {
            let outcome = joined.unwrap_or_else(|join_err| {
                Err(RuntimeError::Io(std::io::Error::other(join_err)))
            });
            if let Err(err) = outcome {
                error!(stem = %key, error = %err, "failed to stop leaf during unregister");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        if let Err(err) = self.balancer.unbind_stem(&stem.haproxy_backend).await {
            error!(stem = %key, error = %err, "failed to unbind stem backend");
            if first_error.is_none() {
                first_error = Some(err.into());
            }
        }

        if let Err(err) = self.stem_repo.delete(key) {
            error!(stem = %key, error = %err, "failed to delete stem record");
            if first_error.is_none() {
                first_error = Some(err.into());
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!(stem = %key, "stem unregistered");
                Ok(())
            }
        }
    }

    fn fetch_stem_info(&self, key: &StemKey) -> Result<Stem> {
        Ok(self.stem_repo.fetch(key)?)
    }

    fn list_stems(&self) -> Result<Vec<Stem>> {
        Ok(self.stem_repo.list()?)
    }
}
