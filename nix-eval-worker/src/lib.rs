// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Worker-side evaluation for `nix-eval-jobs`.
//!
//! Everything a single evaluator process does lives here: loading the root,
//! walking attribute paths, classifying values, materializing derivation
//! records, and speaking the line protocol with the driver. The driver side
//! (process pool, scheduling, output ordering) lives in the `nix-eval-jobs`
//! binary crate.
//!
//! The evaluator itself is a collaborator behind the [`eval::Eval`] trait;
//! [`cli::NixEval`] is the production backend, and a deterministic in-memory
//! evaluator is available to tests via the `test` feature.

pub mod attr_path;
pub mod cli;
pub mod config;
pub mod eval;
pub mod record;
pub mod source;
pub mod worker;
pub mod wrapper;

#[cfg(any(test, feature = "test"))]
pub mod fake;

pub use attr_path::{AttrPath, Selector, glob_matches};
pub use config::{EvalOptions, WorkerConfig};
pub use eval::{Eval, EvalError, EvalResult, Forced, Value};
pub use record::{CacheStatus, DrvRecord, ErrorRecord, Reply, Request, Response};
pub use source::RootSource;
pub use worker::{READY_LINE, WORKER_ARG, WORKER_ARGV0, WorkerError, run_worker};
pub use wrapper::Walker;
