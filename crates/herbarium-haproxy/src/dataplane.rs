// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Low-level operations against the HAProxy Data Plane API.
//!
//! Every mutating call carries the surrounding transaction ID as the
//! `transaction_id` query parameter; nothing in this module commits or rolls
//! back. Backends are created in HTTP mode with round-robin balancing and a
//! `HEAD /` health check against `Host: localhost`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HaproxyError, Result};

/// Connection settings for the Data Plane API.
#[derive(Debug, Clone)]
pub struct HaproxyConfig {
    /// Base URL of the API, e.g. `http://localhost:5555/v2`.
    pub api_url: String,
    /// Basic auth user.
    pub login: String,
    /// Basic auth password.
    pub password: String,
}

/// One backend member as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendServer {
    /// Server name inside the backend.
    pub name: String,
    /// Server address.
    pub address: String,
    /// Server port.
    pub port: u16,
}

/// Driver operations on the Data Plane API.
///
/// The trait exists so the transactional middleware and the high-level client
/// can be exercised against a scripted fake in tests.
#[async_trait]
pub trait DataplaneApi: Send + Sync {
    /// Current configuration version.
    async fn version(&self) -> Result<i64>;

    /// Start a transaction against the given configuration version and
    /// return its ID.
    async fn start_transaction(&self, version: i64) -> Result<String>;

    /// Commit a transaction.
    async fn commit_transaction(&self, transaction_id: &str) -> Result<()>;

    /// Roll back a transaction.
    async fn rollback_transaction(&self, transaction_id: &str) -> Result<()>;

    /// Create a backend, replacing any existing backend with the same name.
    async fn create_backend(&self, backend: &str, transaction_id: &str) -> Result<()>;

    /// Add a server to a backend.
    async fn add_server(
        &self,
        backend: &str,
        server: &str,
        host: &str,
        port: u16,
        transaction_id: &str,
    ) -> Result<()>;

    /// Delete a server from a backend. A missing server is not an error.
    async fn delete_server(&self, backend: &str, server: &str, transaction_id: &str)
        -> Result<()>;

    /// List the servers of a backend. A missing backend yields an empty list.
    async fn servers(&self, backend: &str, transaction_id: &str) -> Result<Vec<BackendServer>>;
}

/// HTTP implementation of [`DataplaneApi`] using basic auth.
#[derive(Debug, Clone)]
pub struct DataplaneClient {
    http: reqwest::Client,
    base: String,
    login: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[allow(dead_code)]
    code: Option<i64>,
    message: Option<String>,
}

impl DataplaneClient {
    /// Create a client from connection settings.
    pub fn new(config: HaproxyConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: config.api_url.trim_end_matches('/').to_string(),
            login: config.login,
            password: config.password,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .basic_auth(&self.login, Some(&self.password))
    }
}

/// Whether a transaction-level status means the configuration version moved.
fn is_conflict_status(status: u16) -> bool {
    status == 406 || status == 409
}

#[async_trait]
impl DataplaneApi for DataplaneClient {
    async fn version(&self) -> Result<i64> {
        let resp = self
            .request(reqwest::Method::GET, "/configuration/version")
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            return Err(HaproxyError::UnexpectedStatus {
                operation: "version",
                status,
                body,
            });
        }
        body.trim()
            .parse::<i64>()
            .map_err(|e| HaproxyError::Parse {
                operation: "version",
                message: format!("body {:?} is not an integer: {}", body.trim(), e),
            })
    }

    async fn start_transaction(&self, version: i64) -> Result<String> {
        let resp = self
            .request(reqwest::Method::POST, "/transactions")
            .query(&[("version", version.to_string())])
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if is_conflict_status(status) {
            return Err(HaproxyError::Conflict {
                operation: "start_transaction",
                body,
            });
        }
        if status != 201 {
            return Err(HaproxyError::UnexpectedStatus {
                operation: "start_transaction",
                status,
                body,
            });
        }
        let tx: TransactionBody =
            serde_json::from_str(&body).map_err(|e| HaproxyError::Parse {
                operation: "start_transaction",
                message: format!("cannot parse transaction id: {}", e),
            })?;
        Ok(tx.id)
    }

    async fn commit_transaction(&self, transaction_id: &str) -> Result<()> {
        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/transactions/{}", transaction_id),
            )
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if is_conflict_status(status) {
            return Err(HaproxyError::Conflict {
                operation: "commit_transaction",
                body,
            });
        }
        if status != 202 {
            return Err(HaproxyError::UnexpectedStatus {
                operation: "commit_transaction",
                status,
                body,
            });
        }
        Ok(())
    }

    async fn rollback_transaction(&self, transaction_id: &str) -> Result<()> {
        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!("/transactions/{}", transaction_id),
            )
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            return Err(HaproxyError::UnexpectedStatus {
                operation: "rollback_transaction",
                status,
                body,
            });
        }
        Ok(())
    }

    async fn create_backend(&self, backend: &str, transaction_id: &str) -> Result<()> {
        // Upsert semantics: an existing backend with the same name is deleted
        // before the new one is created.
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/configuration/backends/{}", backend),
            )
            .query(&[("transaction_id", transaction_id)])
            .send()
            .await?;
        if resp.status().as_u16() == 200 {
            info!(backend = %backend, "backend already exists, deleting before create");
            let delete = self
                .request(
                    reqwest::Method::DELETE,
                    &format!("/configuration/backends/{}", backend),
                )
                .query(&[("transaction_id", transaction_id)])
                .send()
                .await?;
            let status = delete.status().as_u16();
            if status != 202 {
                let body = delete.text().await?;
                return Err(HaproxyError::UnexpectedStatus {
                    operation: "create_backend",
                    status,
                    body,
                });
            }
        }

        let backend_data = serde_json::json!({
            "name": backend,
            "mode": "http",
            "balance": { "algorithm": "roundrobin" },
            "http_connection_mode": "http-server-close",
            "redispatch": { "enabled": "enabled" },
            "http-check": {
                "method": "HEAD",
                "uri": "/",
                "version": "HTTP/1.1",
                "headers": [ { "name": "Host", "value": "localhost" } ],
            },
        });

        let create = self
            .request(reqwest::Method::POST, "/configuration/backends")
            .query(&[("transaction_id", transaction_id)])
            .json(&backend_data)
            .send()
            .await?;
        let status = create.status().as_u16();
        if status != 202 {
            let body = create.text().await?;
            return Err(HaproxyError::UnexpectedStatus {
                operation: "create_backend",
                status,
                body,
            });
        }
        debug!(backend = %backend, transaction_id = %transaction_id, "backend created");
        Ok(())
    }

    async fn add_server(
        &self,
        backend: &str,
        server: &str,
        host: &str,
        port: u16,
        transaction_id: &str,
    ) -> Result<()> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/configuration/backends/{}/servers", backend),
            )
            .query(&[("transaction_id", transaction_id)])
            .json(&serde_json::json!({
                "name": server,
                "address": host,
                "port": port,
            }))
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status != 201 && status != 202 {
            let body = resp.text().await?;
            return Err(HaproxyError::UnexpectedStatus {
                operation: "add_server",
                status,
                body,
            });
        }
        debug!(
            backend = %backend,
            server = %server,
            address = %host,
            port = port,
            status = status,
            "server added to backend"
        );
        Ok(())
    }

    async fn delete_server(
        &self,
        backend: &str,
        server: &str,
        transaction_id: &str,
    ) -> Result<()> {
        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!("/configuration/backends/{}/servers/{}", backend, server),
            )
            .query(&[("transaction_id", transaction_id)])
            .send()
            .await?;
        let status = resp.status().as_u16();
        match status {
            // Immediate success or accepted for reload.
            204 | 202 => {
                debug!(backend = %backend, server = %server, "server deleted from backend");
                Ok(())
            }
            404 => {
                let body = resp.text().await?;
                let api_err: ApiErrorBody =
                    serde_json::from_str(&body).map_err(|e| HaproxyError::Parse {
                        operation: "delete_server",
                        message: format!("cannot parse 404 body: {}", e),
                    })?;
                info!(
                    backend = %backend,
                    server = %server,
                    message = %api_err.message.unwrap_or_default(),
                    "server or backend not found, nothing to delete"
                );
                Ok(())
            }
            _ => {
                let body = resp.text().await?;
                Err(HaproxyError::UnexpectedStatus {
                    operation: "delete_server",
                    status,
                    body,
                })
            }
        }
    }

    async fn servers(&self, backend: &str, transaction_id: &str) -> Result<Vec<BackendServer>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/configuration/backends/{}/servers", backend),
            )
            .query(&[("transaction_id", transaction_id)])
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status == 404 {
            info!(backend = %backend, "backend not found, no servers to list");
            return Ok(Vec::new());
        }
        let body = resp.text().await?;
        if status != 200 {
            return Err(HaproxyError::UnexpectedStatus {
                operation: "servers",
                status,
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| HaproxyError::Parse {
            operation: "servers",
            message: format!("cannot parse server list: {}", e),
        })
    }
}
