// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test helpers: recording fakes for the balancer and the lifecycle
//! seams, plus catalog fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use herbarium_core::models::{graft_node_id, Leaf, LeafStatus, Stem, StemConfig, StemKey, StemType};
use herbarium_core::{Catalog, LeafRepository, StemRepository};
use herbarium_haproxy::{Balancer, HaproxyError};
use herbarium_runtime::error::RuntimeError;
use herbarium_runtime::LeafLifecycle;

/// One recorded balancer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalancerCall {
    BindStem(String),
    BindLeaf {
        backend: String,
        server: String,
        host: String,
        port: u16,
    },
    UnbindLeaf {
        backend: String,
        server: String,
    },
    ReplaceLeaf {
        backend: String,
        old_server: String,
        new_server: String,
        host: String,
        port: u16,
    },
    UnbindStem(String),
}

/// A recording [`Balancer`] with scriptable failures.
#[derive(Default)]
pub struct MockBalancer {
    calls: Mutex<Vec<BalancerCall>>,
    pub fail_bind_stem: AtomicBool,
    pub fail_bind_leaf: AtomicBool,
    pub fail_unbind_leaf: AtomicBool,
    pub fail_replace_leaf: AtomicBool,
    pub fail_unbind_stem: AtomicBool,
}

impl MockBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<BalancerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn replace_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BalancerCall::ReplaceLeaf { .. }))
            .count()
    }

    fn record(&self, call: BalancerCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn scripted_failure(operation: &'static str) -> HaproxyError {
        HaproxyError::UnexpectedStatus {
            operation,
            status: 500,
            body: "scripted failure".to_string(),
        }
    }
}

#[async_trait]
impl Balancer for MockBalancer {
    async fn bind_stem(&self, backend: &str) -> Result<(), HaproxyError> {
        self.record(BalancerCall::BindStem(backend.to_string()));
        if self.fail_bind_stem.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure("create_backend"));
        }
        Ok(())
    }

    async fn bind_leaf(
        &self,
        backend: &str,
        leaf_id: &str,
        host: &str,
        port: u16,
    ) -> Result<(), HaproxyError> {
        self.record(BalancerCall::BindLeaf {
            backend: backend.to_string(),
            server: leaf_id.to_string(),
            host: host.to_string(),
            port,
        });
        if self.fail_bind_leaf.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure("add_server"));
        }
        Ok(())
    }

    async fn unbind_leaf(&self, backend: &str, server: &str) -> Result<(), HaproxyError> {
        self.record(BalancerCall::UnbindLeaf {
            backend: backend.to_string(),
            server: server.to_string(),
        });
        if self.fail_unbind_leaf.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure("delete_server"));
        }
        Ok(())
    }

    async fn replace_leaf(
        &self,
        backend: &str,
        old_server: &str,
        new_server: &str,
        host: &str,
        port: u16,
    ) -> Result<(), HaproxyError> {
        self.record(BalancerCall::ReplaceLeaf {
            backend: backend.to_string(),
            old_server: old_server.to_string(),
            new_server: new_server.to_string(),
            host: host.to_string(),
            port,
        });
        if self.fail_replace_leaf.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure("add_server"));
        }
        Ok(())
    }

    async fn unbind_stem(&self, backend: &str) -> Result<(), HaproxyError> {
        self.record(BalancerCall::UnbindStem(backend.to_string()));
        if self.fail_unbind_stem.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure("delete_server"));
        }
        Ok(())
    }
}

/// A recording [`LeafLifecycle`] that keeps the catalog consistent with the
/// calls it receives, the way the real manager would.
pub struct MockLeafLifecycle {
    pub leaf_repo: LeafRepository,
    starts: Mutex<Vec<(StemKey, Option<String>)>>,
    stops: Mutex<Vec<(StemKey, String)>>,
    grafts: Mutex<Vec<StemKey>>,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    counter: AtomicU64,
}

impl MockLeafLifecycle {
    pub fn new(leaf_repo: LeafRepository) -> Self {
        Self {
            leaf_repo,
            starts: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            grafts: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    pub fn starts(&self) -> Vec<(StemKey, Option<String>)> {
        self.starts.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<(StemKey, String)> {
        self.stops.lock().unwrap().clone()
    }

    pub fn grafts(&self) -> Vec<StemKey> {
        self.grafts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeafLifecycle for MockLeafLifecycle {
    async fn start_leaf(
        &self,
        key: &StemKey,
        replace_server: Option<&str>,
    ) -> Result<String, RuntimeError> {
        self.starts
            .lock()
            .unwrap()
            .push((key.clone(), replace_server.map(str::to_string)));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::NotReady {
                leaf_id: "scripted".to_string(),
                timeout_secs: 30,
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let leaf_id = format!("{}-{}-{}", key.name, key.version, n);
        self.leaf_repo.add_leaf(
            key,
            &leaf_id,
            &leaf_id,
            4242 + n as u32,
            8000 + n as u16,
            Utc::now(),
        )?;
        Ok(leaf_id)
    }

    async fn stop_leaf(&self, key: &StemKey, leaf_id: &str) -> Result<(), RuntimeError> {
        self.stops
            .lock()
            .unwrap()
            .push((key.clone(), leaf_id.to_string()));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(HaproxyError::UnexpectedStatus {
                operation: "delete_server",
                status: 500,
                body: "scripted failure".to_string(),
            }
            .into());
        }
        self.leaf_repo.remove_leaf(key, leaf_id)?;
        Ok(())
    }

    fn running_leaves(&self, key: &StemKey) -> Result<Vec<Leaf>, RuntimeError> {
        let mut running: Vec<Leaf> = self
            .leaf_repo
            .list_leaves(key)?
            .into_iter()
            .filter(|leaf| leaf.status == LeafStatus::Running)
            .collect();
        running.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(running)
    }

    async fn start_graft_node(&self, key: &StemKey) -> Result<String, RuntimeError> {
        self.grafts.lock().unwrap().push(key.clone());
        let graft_id = graft_node_id(&key.name, &key.version);
        self.leaf_repo.set_graft_node(
            key,
            Leaf {
                id: graft_id.clone(),
                pid: 0,
                haproxy_server: graft_id.clone(),
                port: 9000,
                status: LeafStatus::Running,
                initialized: Utc::now(),
            },
        )?;
        Ok(graft_id)
    }
}

/// Fresh catalog with both repositories.
pub fn repositories() -> (Arc<Catalog>, StemRepository, LeafRepository) {
    let catalog = Arc::new(Catalog::new());
    let stem_repo = StemRepository::new(catalog.clone());
    let leaf_repo = LeafRepository::new(catalog.clone());
    (catalog, stem_repo, leaf_repo)
}

/// A stem config for tests.
pub fn stem_config(
    name: &str,
    version: &str,
    url: &str,
    command: &str,
    start_message: Option<&str>,
) -> StemConfig {
    StemConfig {
        name: name.to_string(),
        url: url.to_string(),
        command: command.to_string(),
        env: HashMap::new(),
        dependencies: Vec::new(),
        version: version.to_string(),
        min_instances: None,
        start_message: start_message.map(str::to_string),
    }
}

/// Save a registered stem built from `config` under `key`.
pub fn seed_stem(stem_repo: &StemRepository, key: &StemKey, config: StemConfig) {
    let stem = Stem {
        name: key.name.clone(),
        stem_type: StemType::Deployment,
        working_url: config.url.clone(),
        haproxy_backend: config.url.trim_start_matches('/').to_string(),
        version: key.version.clone(),
        environment: config.env.clone(),
        leaf_instances: HashMap::new(),
        graft_node_leaf: None,
        config,
    };
    stem_repo.save(key, stem).unwrap();
}

/// Create `<root>/services/<name>/<version>` so leaves have a working
/// directory to start in.
pub fn create_working_directory(root: &Path, name: &str, version: &str) {
    std::fs::create_dir_all(root.join("services").join(name).join(version)).unwrap();
}
