// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! GC-root symlink management.
//!
//! One flat directory, one symlink per distinct derivation: the link name is
//! the base name of the `.drv` path and the target is the full path.
//! Registering the same derivation twice is a no-op; a link that already
//! exists with a *different* target means two derivations collided on their
//! hashed base name, which indicates store corruption and is fatal.

use std::path::{Path, PathBuf};

use crate::error::{IoContext, StoreError};
use crate::store_path::StorePath;

#[derive(Debug, Clone)]
pub struct GcRootsDir {
    dir: PathBuf,
}

impl GcRootsDir {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .io_context(|| format!("failed to create GC roots directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn register(&self, drv_path: &StorePath) -> Result<(), StoreError> {
        let link = self.dir.join(drv_path.base_name());
        match std::os::unix::fs::symlink(drv_path.as_str(), &link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = std::fs::read_link(&link)
                    .io_context(|| format!("failed to read GC root {}", link.display()))?;
                if existing == Path::new(drv_path.as_str()) {
                    Ok(())
                } else {
                    Err(StoreError::RootConflict {
                        link: link.display().to_string(),
                        existing: existing.display().to_string(),
                        target: drv_path.as_str().to_string(),
                    })
                }
            }
            Err(e) => {
                Err(e).io_context(|| format!("failed to create GC root {}", link.display()))
            }
        }
    }
}
