// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Herbarium Runtime - Stem and Leaf Lifecycle
//!
//! This crate supervises per-service process pools on a single host and
//! steers traffic to them through HAProxy:
//!
//! - [`leaf_manager`]: port allocation, process spawning with a readiness
//!   gate, HAProxy binding and termination of individual instances
//! - [`stem_manager`]: registration and teardown of deployed service versions
//! - [`graft`]: the request-gated cold-start server standing in for idle stems
//! - [`platform`]: configuration discovery and platform-wide startup/shutdown
//! - [`settings`]: folders and port base the lifecycle verbs operate with
//!
//! # Cold starts
//!
//! An idle stem is backed by a single in-process HTTP listener, the *graft
//! node*. The first inbound request spawns the real process, waits for it to
//! become healthy, swaps the graft member for the fresh instance in one
//! HAProxy transaction, proxies the in-flight request to it and shuts the
//! graft server down.

#![deny(missing_docs)]

/// Error types for lifecycle operations.
pub mod error;

/// Graft-node cold-start server.
pub mod graft;

/// Leaf instance lifecycle.
pub mod leaf_manager;

/// Configuration discovery and platform startup/shutdown.
pub mod platform;

/// Runtime folders and port allocation base.
pub mod settings;

/// Stem lifecycle.
pub mod stem_manager;

pub use error::RuntimeError;
pub use leaf_manager::{LeafLifecycle, LeafManager};
pub use platform::PlatformManager;
pub use settings::RuntimeSettings;
pub use stem_manager::{StemLifecycle, StemManager};
