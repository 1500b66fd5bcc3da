// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test helpers: a recording fake of the Data Plane API.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use herbarium_haproxy::dataplane::{BackendServer, DataplaneApi};
use herbarium_haproxy::error::{HaproxyError, Result};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Version,
    StartTransaction(i64),
    Commit(String),
    Rollback(String),
    CreateBackend {
        backend: String,
        tx: String,
    },
    AddServer {
        backend: String,
        server: String,
        host: String,
        port: u16,
        tx: String,
    },
    DeleteServer {
        backend: String,
        server: String,
        tx: String,
    },
    Servers {
        backend: String,
        tx: String,
    },
}

/// A scripted [`DataplaneApi`] that records every call.
#[derive(Default)]
pub struct RecordingApi {
    calls: Mutex<Vec<Call>>,
    version: AtomicI64,
    next_tx: AtomicU64,
    /// Commits left to fail with a version conflict before succeeding.
    pub commit_conflicts: AtomicU32,
    /// Fail every `add_server` call.
    pub fail_add_server: AtomicBool,
    /// Fail every `delete_server` call.
    pub fail_delete_server: AtomicBool,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
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
impl DataplaneApi for RecordingApi {
    async fn version(&self) -> Result<i64> {
        self.record(Call::Version);
        Ok(self.version.fetch_add(1, Ordering::SeqCst))
    }

    async fn start_transaction(&self, version: i64) -> Result<String> {
        self.record(Call::StartTransaction(version));
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        Ok(format!("tx-{}", n))
    }

    async fn commit_transaction(&self, transaction_id: &str) -> Result<()> {
        self.record(Call::Commit(transaction_id.to_string()));
        let remaining = self.commit_conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.commit_conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(HaproxyError::Conflict {
                operation: "commit_transaction",
                body: "version advanced under transaction".to_string(),
            });
        }
        Ok(())
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        self.record(Call::Rollback(transaction_id.to_string()));
        Ok(())
    }

    async fn create_backend(&self, backend: &str, tx: &str) -> Result<()> {
        self.record(Call::CreateBackend {
            backend: backend.to_string(),
            tx: tx.to_string(),
        });
        Ok(())
    }

    async fn add_server(
        &self,
        backend: &str,
        server: &str,
        host: &str,
        port: u16,
        tx: &str,
    ) -> Result<()> {
        self.record(Call::AddServer {
            backend: backend.to_string(),
            server: server.to_string(),
            host: host.to_string(),
            port,
            tx: tx.to_string(),
        });
        if self.fail_add_server.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure("add_server"));
        }
        Ok(())
    }

    async fn delete_server(&self, backend: &str, server: &str, tx: &str) -> Result<()> {
        self.record(Call::DeleteServer {
            backend: backend.to_string(),
            server: server.to_string(),
            tx: tx.to_string(),
        });
        if self.fail_delete_server.load(Ordering::SeqCst) {
            return Err(Self::scripted_failure("delete_server"));
        }
        Ok(())
    }

    async fn servers(&self, backend: &str, tx: &str) -> Result<Vec<BackendServer>> {
        self.record(Call::Servers {
            backend: backend.to_string(),
            tx: tx.to_string(),
        });
        Ok(Vec::new())
    }
}
