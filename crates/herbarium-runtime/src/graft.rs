// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Graft-node cold-start server.
//!
//! A graft node is the temporary sole HAProxy backend member of an idle stem:
//! a tiny in-process HTTP listener. The first request cold-starts the real
//! instance, swaps the graft member for it in a single HAProxy transaction,
//! proxies the in-flight request to the fresh instance and then shuts the
//! listener down gracefully so the proxied response can complete.
//!
//! The handler is single-flight per stem: concurrent first requests serialize
//! behind a mutex, and whoever finds the swap already done simply proxies to
//! the registered real leaf.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{self, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use herbarium_core::models::{Stem, StemKey};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use crate::error::{Result, RuntimeError};
use crate::leaf_manager::LeafManager;

struct GraftState {
    key: StemKey,
    working_url: String,
    graft_id: String,
    leaves: LeafManager,
    /// Single-flight guard: only one request drives the cold start.
    flight: Mutex<()>,
    shutdown: mpsc::Sender<()>,
    http: reqwest::Client,
}

/// Bind the graft listener on `port` and serve it in the background.
///
/// The listener is bound before this function returns, so the port is held
/// from the moment the graft node is recorded in the catalog.
pub(crate) async fn spawn_graft_server(
    leaves: LeafManager,
    stem: &Stem,
    graft_id: String,
    port: u16,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let state = Arc::new(GraftState {
        key: stem.key(),
        working_url: stem.working_url.clone(),
        graft_id,
        leaves,
        flight: Mutex::new(()),
        shutdown: shutdown_tx,
        http: reqwest::Client::new(),
    });

    let app = Router::new()
        .fallback(handle_cold_start)
        .with_state(state.clone());

    let stem_label = state.key.to_string();
    tokio::spawn(async move {
        info!(stem = %stem_label, port = port, "graft node server listening");
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        });
        if let Err(err) = serve.await {
            error!(stem = %stem_label, error = %err, "graft node server failed");
        }
        info!(stem = %stem_label, "graft node server stopped");
    });

    Ok(())
}

async fn handle_cold_start(State(state): State<Arc<GraftState>>, req: Request) -> Response {
    if !path_within(req.uri().path(), &state.working_url) {
        return StatusCode::NOT_FOUND.into_response();
    }

    debug!(stem = %state.key, path = %req.uri().path(), "graft node received request");
    let _flight = state.flight.lock().await;

    let swap_pending = match state.leaves.repo().graft_node(&state.key) {
        Ok(node) => node.is_some(),
        Err(err) => {
            error!(stem = %state.key, error = %err, "unable to inspect graft state");
            return internal_error("unable to inspect service state");
        }
    };

    let target_port = if swap_pending {
        match cold_start(&state).await {
            Ok(port) => port,
            Err(err) => {
                error!(stem = %state.key, error = %err, "cold start failed");
                return internal_error("unable to start service instance");
            }
        }
    } else {
        // A concurrent request already performed the swap; route to the
        // freshest registered instance.
        match state.leaves.running_leaves(&state.key) {
            Ok(leaves) => match leaves.last() {
                Some(leaf) => leaf.port,
                None => {
                    error!(stem = %state.key, "graft cleared but no running leaf registered");
                    return internal_error("no running instance available");
                }
            },
            Err(err) => {
                error!(stem = %state.key, error = %err, "unable to list running leaves");
                return internal_error("no running instance available");
            }
        }
    };

    let response = match forward(&state.http, target_port, &state.working_url, req).await {
        Ok(response) => response,
        Err(err) => {
            error!(stem = %state.key, port = target_port, error = %err, "failed to proxy request");
            internal_error("unable to reach service instance")
        }
    };

    // The graft member is out of HAProxy; retire the listener once this
    // response has gone out. Graceful shutdown lets it complete.
    let _ = state.shutdown.try_send(());
    response
}

/// Start the real instance, atomically replacing the graft member, and
/// return the new instance's port.
async fn cold_start(state: &GraftState) -> Result<u16> {
    let real_id = state
        .leaves
        .start_leaf(&state.key, Some(&state.graft_id))
        .await?;
    let leaf = state.leaves.repo().find_leaf(&state.key, &real_id)?;
    state.leaves.repo().clear_graft_node(&state.key)?;
    info!(stem = %state.key, leaf_id = %real_id, "graft node replaced by real instance");
    Ok(leaf.port)
}

/// Proxy the request to `http://localhost:<port>`, stripping the stem's
/// working URL from the path.
async fn forward(
    client: &reqwest::Client,
    port: u16,
    working_url: &str,
    req: Request,
) -> Result<Response> {
    let (parts, body) = req.into_parts();

    let path = parts.uri.path();
    let stripped = path.strip_prefix(working_url).unwrap_or(path);
    let stripped = if stripped.is_empty() { "/" } else { stripped };
    let query = parts
        .uri
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let url = format!("http://localhost:{}{}{}", port, stripped, query);
    debug!(url = %url, "forwarding request to real instance");

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|err| RuntimeError::Proxy(format!("invalid method: {}", err)))?;

    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| RuntimeError::Proxy(format!("failed to read request body: {}", err)))?;

    let mut upstream = client.request(method, &url);
    for (name, value) in parts.headers.iter() {
        if name.as_str().eq_ignore_ascii_case("host") {
            continue;
        }
        upstream = upstream.header(name.as_str(), value.as_bytes());
    }

    let upstream_response = upstream
        .body(body_bytes.to_vec())
        .send()
        .await
        .map_err(|err| RuntimeError::Proxy(err.to_string()))?;

    let status = upstream_response.status().as_u16();
    let mut builder = http::Response::builder().status(status);
    for (name, value) in upstream_response.headers().iter() {
        let lowered = name.as_str();
        if lowered.eq_ignore_ascii_case("transfer-encoding")
            || lowered.eq_ignore_ascii_case("connection")
        {
            continue;
        }
        builder = builder.header(lowered, value.as_bytes());
    }
    let bytes = upstream_response
        .bytes()
        .await
        .map_err(|err| RuntimeError::Proxy(err.to_string()))?;

    builder
        .body(Body::from(bytes))
        .map_err(|err| RuntimeError::Proxy(err.to_string()))
}

fn internal_error(detail: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal error: {}", detail),
    )
        .into_response()
}

fn path_within(path: &str, working_url: &str) -> bool {
    if working_url == "/" {
        return true;
    }
    path == working_url || path.starts_with(&format!("{}/", working_url))
}
