// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Per-worker configuration, sent by the driver as the handshake line.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::source::RootSource;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalOptions {
    /// Include `meta` on derivation records.
    pub meta: bool,
    /// Populate `cacheStatus` / `neededBuilds` / `neededSubstitutes`.
    pub check_cache_status: bool,
    /// Populate `inputDrvs` from the instantiated derivation.
    pub show_input_drvs: bool,
    /// Compute `drvPath` without writing to the store. Implies that
    /// `inputDrvs` and the cache fields are skipped.
    pub no_instantiate: bool,
    /// Recurse into attribute sets not marked `recurseForDerivations`.
    pub force_recurse: bool,
    /// User function applied to each derivation, producing `extraValue`.
    pub apply: Option<String>,
    /// User function applied to the root before traversal.
    pub select: Option<String>,
    pub gc_roots_dir: Option<PathBuf>,
    /// Store directory as it appears in store paths (`/nix/store`).
    pub store_dir: Option<PathBuf>,
    /// Where that directory actually lives on disk, when different.
    pub real_store_dir: Option<PathBuf>,
    /// Binary caches consulted for cache-status checks.
    pub substituters: Vec<String>,
    /// Address-space cap the worker applies to itself, in megabytes.
    pub max_memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub source: RootSource,
    #[serde(default)]
    pub opts: EvalOptions,
}
