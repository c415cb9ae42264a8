// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Usage(String),

    #[error("failed to spawn evaluator worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("all evaluator workers died, cannot continue")]
    AllWorkersDied,

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DriverError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}

/// Helper trait for adding context to IO errors
pub trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T, DriverError>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T, DriverError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DriverError::io(f(), e))
    }
}
