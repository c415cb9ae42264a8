// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid store path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("failed to parse derivation '{path}': {reason}")]
    DrvParse { path: String, reason: String },

    #[error(
        "GC root '{link}' already points at '{existing}', refusing to repoint it at '{target}'"
    )]
    RootConflict {
        link: String,
        existing: String,
        target: String,
    },
}

impl StoreError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Helper trait for adding context to IO errors
pub trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| StoreError::io(f(), e))
    }
}
