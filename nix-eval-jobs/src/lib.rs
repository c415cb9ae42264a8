// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Driver side of `nix-eval-jobs`: CLI surface, worker pool, traversal
//! scheduling, ordered record emission, and constituent resolution. The
//! worker side lives in the `nix-eval-worker` crate; the binary runs both,
//! selected by an argv marker.

pub mod aggregator;
pub mod constituents;
pub mod driver;
pub mod error;
pub mod opts;
pub mod pool;
pub mod traversal;

#[cfg(test)]
mod tests;
