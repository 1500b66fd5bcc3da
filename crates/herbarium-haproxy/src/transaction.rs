// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transactional middleware around driver calls.

use std::future::Future;

use tracing::{debug, error};

use crate::dataplane::DataplaneApi;
use crate::error::Result;

/// Run `op` inside a fresh Data Plane transaction.
///
/// The current configuration version is fetched, a transaction is started
/// against it and its ID handed to `op`. On success the transaction is
/// committed; on failure it is rolled back and the operation's error is
/// returned. A rollback failure is logged but never masks the operation's
/// error. A commit failure (including a version [`Conflict`]) is the caller's
/// to handle; no retries happen here.
///
/// [`Conflict`]: crate::error::HaproxyError::Conflict
pub async fn with_transaction<A, T, F, Fut>(api: &A, op: F) -> Result<T>
where
    A: DataplaneApi + ?Sized,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let version = api.version().await?;
    let transaction_id = api.start_transaction(version).await?;
    debug!(version = version, transaction_id = %transaction_id, "transaction started");

    match op(transaction_id.clone()).await {
        Ok(value) => {
            api.commit_transaction(&transaction_id).await?;
            debug!(transaction_id = %transaction_id, "transaction committed");
            Ok(value)
        }
        Err(err) => {
            error!(transaction_id = %transaction_id, error = %err, "rolling back transaction");
            if let Err(rollback_err) = api.rollback_transaction(&transaction_id).await {
                error!(
                    transaction_id = %transaction_id,
                    error = %rollback_err,
                    "rollback failed"
                );
            }
            Err(err)
        }
    }
}
