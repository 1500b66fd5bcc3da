// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! High-level HAProxy verbs used by the runtime.
//!
//! Each verb runs inside exactly one Data Plane transaction. `replace_leaf`
//! deletes the old member and adds the new one in the same transaction, so an
//! outside observer never sees the backend empty or with both members.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::dataplane::DataplaneApi;
use crate::error::Result;
use crate::transaction::with_transaction;

/// Attempts per verb when the configuration version races.
const TX_ATTEMPTS: u32 = 3;

/// Base delay between conflict retries; grows linearly per attempt.
const TX_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The routing surface the runtime mutates.
#[async_trait]
pub trait Balancer: Send + Sync {
    /// Create the backend for a stem.
    async fn bind_stem(&self, backend: &str) -> Result<()>;

    /// Add a leaf as a member of the stem's backend.
    async fn bind_leaf(&self, backend: &str, leaf_id: &str, host: &str, port: u16) -> Result<()>;

    /// Remove a leaf from the stem's backend.
    async fn unbind_leaf(&self, backend: &str, server: &str) -> Result<()>;

    /// Atomically swap one backend member for another.
    async fn replace_leaf(
        &self,
        backend: &str,
        old_server: &str,
        new_server: &str,
        host: &str,
        port: u16,
    ) -> Result<()>;

    /// Remove the stem's members from HAProxy.
    async fn unbind_stem(&self, backend: &str) -> Result<()>;
}

/// [`Balancer`] implementation over a [`DataplaneApi`] driver.
pub struct HaproxyClient {
    api: Arc<dyn DataplaneApi>,
}

impl HaproxyClient {
    /// Create a client over the given driver.
    pub fn new(api: Arc<dyn DataplaneApi>) -> Self {
        Self { api }
    }

    /// Run one transactional attempt, retrying on version conflicts with a
    /// bounded linear backoff.
    async fn with_retry<T, F, Fut>(&self, verb: &'static str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Err(err) if err.is_conflict() && attempt < TX_ATTEMPTS => {
                    warn!(
                        verb = verb,
                        attempt = attempt,
                        error = %err,
                        "configuration version conflict, retrying"
                    );
                    tokio::time::sleep(TX_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl Balancer for HaproxyClient {
    async fn bind_stem(&self, backend: &str) -> Result<()> {
        info!(backend = %backend, "binding stem as backend");
        self.with_retry("bind_stem", move || async move {
            with_transaction(self.api.as_ref(), |tx| async move {
                self.api.create_backend(backend, &tx).await
            })
            .await
        })
        .await
    }

    async fn bind_leaf(&self, backend: &str, leaf_id: &str, host: &str, port: u16) -> Result<()> {
        info!(
            backend = %backend,
            leaf_id = %leaf_id,
            address = %format_args!("{}:{}", host, port),
            "binding leaf"
        );
        self.with_retry("bind_leaf", move || async move {
            with_transaction(self.api.as_ref(), |tx| async move {
                self.api.add_server(backend, leaf_id, host, port, &tx).await
            })
            .await
        })
        .await
    }

    async fn unbind_leaf(&self, backend: &str, server: &str) -> Result<()> {
        debug!(backend = %backend, server = %server, "unbinding leaf");
        self.with_retry("unbind_leaf", move || async move {
            with_transaction(self.api.as_ref(), |tx| async move {
                self.api.delete_server(backend, server, &tx).await
            })
            .await
        })
        .await
    }

    async fn replace_leaf(
        &self,
        backend: &str,
        old_server: &str,
        new_server: &str,
        host: &str,
        port: u16,
    ) -> Result<()> {
        info!(
            backend = %backend,
            old_server = %old_server,
            new_server = %new_server,
            "replacing backend member"
        );
        self.with_retry("replace_leaf", move || async move {
            with_transaction(self.api.as_ref(), |tx| async move {
                self.api.delete_server(backend, old_server, &tx).await?;
                self.api
                    .add_server(backend, new_server, host, port, &tx)
                    .await
            })
            .await
        })
        .await
    }

    async fn unbind_stem(&self, backend: &str) -> Result<()> {
        debug!(backend = %backend, "unbinding stem");
        // An empty server name removes all members; the backend object itself
        // is left in place (see DESIGN.md).
        self.with_retry("unbind_stem", move || async move {
            with_transaction(self.api.as_ref(), |tx| async move {
                self.api.delete_server(backend, "", &tx).await
            })
            .await
        })
        .await
    }
}
