// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Substituter announcement queries.
//!
//! A binary cache announces a store path by serving
//! `<url>/<hash-part>.narinfo`. Probing that file is all the cache-status
//! check needs; the NAR itself is never fetched.

use std::time::Duration;

use crate::store_path::StorePath;

pub trait Substituter {
    fn name(&self) -> &str;

    /// Whether the substituter announces the given store path.
    ///
    /// Probe failures (network, TLS, 5xx) count as "not announced": a
    /// substituter that cannot be reached cannot substitute.
    fn has_path(&self, path: &StorePath) -> bool;
}

/// An HTTP(S) binary cache.
pub struct BinaryCache {
    url: String,
    client: reqwest::blocking::Client,
}

impl BinaryCache {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let mut url = url.into();
        while url.ends_with('/') {
            url.pop();
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { url, client })
    }
}

impl Substituter for BinaryCache {
    fn name(&self) -> &str {
        &self.url
    }

    fn has_path(&self, path: &StorePath) -> bool {
        let narinfo = format!("{}/{}.narinfo", self.url, path.hash_part());
        match self.client.head(&narinfo).send() {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::debug!("substituter {} probe failed for {path}: {e}", self.url);
                false
            }
        }
    }
}

/// A substituter backed by a fixed set of paths, for tests.
#[cfg(any(test, feature = "test"))]
pub struct StaticSubstituter {
    paths: std::collections::BTreeSet<StorePath>,
}

#[cfg(any(test, feature = "test"))]
impl StaticSubstituter {
    pub fn new(paths: impl IntoIterator<Item = StorePath>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }
}

#[cfg(any(test, feature = "test"))]
impl Substituter for StaticSubstituter {
    fn name(&self) -> &str {
        "static"
    }

    fn has_path(&self, path: &StorePath) -> bool {
        self.paths.contains(path)
    }
}
