// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Read-only access to a Nix store.
//!
//! This crate covers the store side of job evaluation: store path types,
//! parsing `.drv` files for their outputs and input derivations, maintaining
//! a flat directory of GC-root symlinks, and answering "what would have to be
//! built or substituted" for a derivation closure. It never writes to the
//! store itself; the evaluator is the only component that instantiates.

pub mod derivation;
pub mod error;
pub mod missing;
pub mod roots;
pub mod store_path;
pub mod substituter;

pub use derivation::Derivation;
pub use error::{IoContext, StoreError};
pub use missing::{Missing, query_missing};
pub use roots::GcRootsDir;
pub use store_path::{Store, StorePath};
pub use substituter::{BinaryCache, Substituter};
