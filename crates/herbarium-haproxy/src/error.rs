// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for HAProxy operations.

use thiserror::Error;

/// Result type using HaproxyError.
pub type Result<T> = std::result::Result<T, HaproxyError>;

/// Errors from the Data Plane API driver and client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HaproxyError {
    /// The HTTP request itself failed.
    #[error("dataplane request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a status the operation does not accept.
    #[error("unexpected status {status} from {operation}: {body}")]
    UnexpectedStatus {
        /// The driver operation that observed the status.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// A response body could not be parsed.
    #[error("failed to parse dataplane response for {operation}: {message}")]
    Parse {
        /// The driver operation whose response failed to parse.
        operation: &'static str,
        /// Parse failure details.
        message: String,
    },

    /// The configuration version advanced under the transaction. Retryable.
    #[error("configuration version conflict during {operation}: {body}")]
    Conflict {
        /// The driver operation that observed the conflict.
        operation: &'static str,
        /// Response body, for diagnostics.
        body: String,
    },
}

impl HaproxyError {
    /// Whether the error is a configuration version conflict and the
    /// operation can be retried against a fresh version.
    pub fn is_conflict(&self) -> bool {
        matches!(self, HaproxyError::Conflict { .. })
    }
}
