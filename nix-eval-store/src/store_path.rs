// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Store path types.
//!
//! Records trade absolute store paths (`/nix/store/<hash>-<name>`), so the
//! path type here keeps the full rendering and derives the hash part and base
//! name from it on demand. The [`Store`] view maps those logical paths onto
//! the directory where they actually live, which may differ when the store is
//! mounted elsewhere (or, in tests, lives in a temporary directory).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// An absolute path inside a Nix store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorePath(String);

impl StorePath {
    /// Parse an absolute store path.
    ///
    /// Validation is intentionally shallow: the path must be absolute and its
    /// final component must carry a `<hash>-<name>` shape. The evaluator is
    /// the authority on what a store path is; this only rejects values that
    /// cannot possibly be one.
    pub fn parse(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(StoreError::InvalidPath {
                path,
                reason: "not an absolute path".into(),
            });
        }
        let base = match path.rsplit('/').next() {
            Some(base) if !base.is_empty() => base,
            _ => {
                return Err(StoreError::InvalidPath {
                    path,
                    reason: "empty base name".into(),
                });
            }
        };
        match base.split_once('-') {
            Some((hash, name)) if !hash.is_empty() && !name.is_empty() => {}
            _ => {
                return Err(StoreError::InvalidPath {
                    path,
                    reason: "base name is not of the form <hash>-<name>".into(),
                });
            }
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path component, `<hash>-<name>`.
    pub fn base_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The hash part of the base name, used to address `.narinfo` files.
    pub fn hash_part(&self) -> &str {
        let base = self.base_name();
        base.split_once('-').map(|(h, _)| h).unwrap_or(base)
    }

    pub fn is_drv(&self) -> bool {
        self.0.ends_with(".drv")
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A local view of the store: the directory store paths claim to live in and
/// the directory they actually live in.
#[derive(Debug, Clone)]
pub struct Store {
    virtual_dir: PathBuf,
    real_dir: Option<PathBuf>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            virtual_dir: PathBuf::from("/nix/store"),
            real_dir: None,
        }
    }
}

impl Store {
    pub fn new(virtual_dir: impl Into<PathBuf>) -> Self {
        Self {
            virtual_dir: virtual_dir.into(),
            real_dir: None,
        }
    }

    /// Honor `NIX_STORE_DIR` the way the rest of the Nix tooling does.
    pub fn from_env() -> Self {
        match std::env::var_os("NIX_STORE_DIR") {
            Some(dir) => Self::new(PathBuf::from(dir)),
            None => Self::default(),
        }
    }

    /// Serve store paths from a different on-disk location, e.g. a store
    /// bind-mounted under another prefix.
    pub fn with_real_dir(mut self, real_dir: impl Into<PathBuf>) -> Self {
        self.real_dir = Some(real_dir.into());
        self
    }

    pub fn virtual_dir(&self) -> &Path {
        &self.virtual_dir
    }

    /// Map a logical store path to where it can be opened.
    pub fn to_real_path(&self, path: &StorePath) -> PathBuf {
        let logical = Path::new(path.as_str());
        if let Some(real) = &self.real_dir
            && let Ok(rest) = logical.strip_prefix(&self.virtual_dir)
        {
            return real.join(rest);
        }
        logical.to_path_buf()
    }

    /// Whether the path is present on disk.
    ///
    /// This is a physical check, not a database query; good enough for
    /// cache-status classification, where a false negative only downgrades
    /// `Cached` to a substituter probe.
    pub fn is_valid_path(&self, path: &StorePath) -> bool {
        self.to_real_path(path).symlink_metadata().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_store_paths() {
        let p = StorePath::parse("/nix/store/9ip48p3s43pkbcb1gqa2sfnqvy2y6p5a-hello-2.12").unwrap();
        assert_eq!(p.base_name(), "9ip48p3s43pkbcb1gqa2sfnqvy2y6p5a-hello-2.12");
        assert_eq!(p.hash_part(), "9ip48p3s43pkbcb1gqa2sfnqvy2y6p5a");
        assert!(!p.is_drv());
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        assert!(StorePath::parse("relative/path").is_err());
        assert!(StorePath::parse("/nix/store/").is_err());
        assert!(StorePath::parse("/nix/store/nodash").is_err());
    }

    /// With a real dir configured, logical paths under the virtual dir are
    /// remapped and everything else is passed through.
    #[test]
    fn real_dir_remapping() {
        let store = Store::new("/nix/store").with_real_dir("/mnt/store");
        let p = StorePath::parse("/nix/store/abc123-x").unwrap();
        assert_eq!(store.to_real_path(&p), PathBuf::from("/mnt/store/abc123-x"));

        let q = StorePath::parse("/other/store/abc123-x").unwrap();
        assert_eq!(store.to_real_path(&q), PathBuf::from("/other/store/abc123-x"));
    }
}
