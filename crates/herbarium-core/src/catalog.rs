// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The in-memory deployment catalog.
//!
//! The catalog maps [`StemKey`]s to [`Stem`]s behind a readers-writer lock
//! and exposes exactly two acquisition primitives: [`Catalog::with_write`]
//! and [`Catalog::with_read`]. Repository methods run entirely inside one of
//! those scopes; nested acquisition is forbidden, and no blocking work
//! (process spawning, HTTP calls) may happen while a scope is open.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::error::{CatalogError, Result};
use crate::models::{Stem, StemKey};

/// Process-wide in-memory store of stems and their leaves.
#[derive(Debug, Default)]
pub struct Catalog {
    stems: RwLock<HashMap<StemKey, Stem>>,
}

static GLOBAL: OnceLock<Catalog> = OnceLock::new();

impl Catalog {
    /// Create an empty catalog. Prefer injecting a catalog over the global
    /// singleton everywhere except the binary entry point.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide catalog, created on first use.
    pub fn global() -> &'static Catalog {
        GLOBAL.get_or_init(Catalog::new)
    }

    /// Run `f` with exclusive access to the stem map. The lock is released on
    /// every exit path, including errors.
    pub fn with_write<T>(
        &self,
        f: impl FnOnce(&mut HashMap<StemKey, Stem>) -> Result<T>,
    ) -> Result<T> {
        let mut stems = self
            .stems
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut stems)
    }

    /// Run `f` with shared access to the stem map.
    pub fn with_read<T>(&self, f: impl FnOnce(&HashMap<StemKey, Stem>) -> Result<T>) -> Result<T> {
        let stems = self.stems.read().unwrap_or_else(PoisonError::into_inner);
        f(&stems)
    }

    /// Remove every stem. Intended for tests.
    pub fn clear(&self) {
        self.stems
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Look up a stem in a locked map, with the standard not-found error.
pub(crate) fn stem_mut<'a>(
    stems: &'a mut HashMap<StemKey, Stem>,
    key: &StemKey,
) -> Result<&'a mut Stem> {
    stems
        .get_mut(key)
        .ok_or_else(|| CatalogError::stem_not_found(key))
}

/// Shared-access variant of [`stem_mut`].
pub(crate) fn stem_ref<'a>(stems: &'a HashMap<StemKey, Stem>, key: &StemKey) -> Result<&'a Stem> {
    stems
        .get(key)
        .ok_or_else(|| CatalogError::stem_not_found(key))
}
