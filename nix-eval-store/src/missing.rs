// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Cache-status classification for a derivation closure.
//!
//! Given a `.drv` on disk, work out which outputs are already valid locally,
//! which can be fetched from a substituter, and which derivations would have
//! to be built. The walk only descends into the inputs of derivations that
//! actually need building: substitution cuts the closure off.

use std::collections::BTreeSet;

use crate::derivation::Derivation;
use crate::store_path::{Store, StorePath};
use crate::substituter::Substituter;

/// What a realisation of the derivation would require.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Missing {
    /// Derivations whose outputs must be built.
    pub will_build: BTreeSet<StorePath>,
    /// Output paths that can be fetched from a substituter.
    pub will_substitute: BTreeSet<StorePath>,
    /// Derivations that could not be read from the store.
    pub unknown: BTreeSet<StorePath>,
}

impl Missing {
    /// All outputs valid locally, nothing to do.
    pub fn is_cached(&self) -> bool {
        self.will_build.is_empty() && self.will_substitute.is_empty() && self.unknown.is_empty()
    }

    /// Nothing to build; everything missing is announced by a substituter.
    pub fn is_substitutable(&self) -> bool {
        self.will_build.is_empty() && self.unknown.is_empty()
    }
}

pub fn query_missing(store: &Store, substituters: &[Box<dyn Substituter>], drv: &StorePath) -> Missing {
    let mut missing = Missing::default();
    let mut visited = BTreeSet::new();
    visit(store, substituters, drv, &mut missing, &mut visited);
    missing
}

fn visit(
    store: &Store,
    substituters: &[Box<dyn Substituter>],
    drv_path: &StorePath,
    missing: &mut Missing,
    visited: &mut BTreeSet<StorePath>,
) {
    if !visited.insert(drv_path.clone()) {
        return;
    }

    let drv = match Derivation::read(&store.to_real_path(drv_path)) {
        Ok(drv) => drv,
        Err(e) => {
            log::debug!("cannot read {drv_path}: {e}");
            missing.unknown.insert(drv_path.clone());
            return;
        }
    };

    let mut needs_build = false;
    for output in drv.outputs.values() {
        let Some(output) = output else {
            // Floating CA output: no path to check, assume a build is needed.
            needs_build = true;
            continue;
        };
        if store.is_valid_path(output) {
            continue;
        }
        if substituters.iter().any(|s| s.has_path(output)) {
            missing.will_substitute.insert(output.clone());
        } else {
            needs_build = true;
        }
    }

    if needs_build {
        missing.will_build.insert(drv_path.clone());
        for input in drv.input_drvs.keys() {
            visit(store, substituters, input, missing, visited);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substituter::StaticSubstituter;

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: Store,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let store = Store::new("/nix/store").with_real_dir(tmp.path());
            Fixture { _tmp: tmp, store }
        }

        fn path(&self, base: &str) -> StorePath {
            StorePath::parse(format!("/nix/store/{base}")).unwrap()
        }

        fn add_drv(
            &self,
            base: &str,
            outputs: &[(&str, &str)],
            inputs: &[(&str, &[&str])],
        ) -> StorePath {
            let drv_path = self.path(base);
            let outs: Vec<String> = outputs
                .iter()
                .map(|(name, out)| format!(r#"("{name}","/nix/store/{out}","","")"#))
                .collect();
            let ins: Vec<String> = inputs
                .iter()
                .map(|(drv, names)| {
                    let names: Vec<String> =
                        names.iter().map(|n| format!(r#""{n}""#)).collect();
                    format!(r#"("/nix/store/{drv}",[{}])"#, names.join(","))
                })
                .collect();
            let text = format!(
                r#"Derive([{}],[{}],[],"x86_64-linux","/bin/sh",[],[])"#,
                outs.join(","),
                ins.join(",")
            );
            std::fs::write(self.store.to_real_path(&drv_path), text).unwrap();
            drv_path
        }

        fn realise(&self, base: &str) {
            let p = self.path(base);
            std::fs::write(self.store.to_real_path(&p), "").unwrap();
        }
    }

    fn no_subs() -> Vec<Box<dyn Substituter>> {
        Vec::new()
    }

    /// Outputs present on disk → nothing to build or substitute.
    #[test]
    fn valid_outputs_are_cached() {
        let fx = Fixture::new();
        let drv = fx.add_drv(
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-job.drv",
            &[("out", "oooooooooooooooooooooooooooooooo-job")],
            &[],
        );
        fx.realise("oooooooooooooooooooooooooooooooo-job");

        let missing = query_missing(&fx.store, &no_subs(), &drv);
        assert!(missing.is_cached(), "{missing:?}");
    }

    /// Missing output announced by a substituter → will_substitute, and the
    /// inputs are never visited.
    #[test]
    fn substitutable_output_cuts_off_the_walk() {
        let fx = Fixture::new();
        let out = "oooooooooooooooooooooooooooooooo-job";
        let drv = fx.add_drv(
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-job.drv",
            &[("out", out)],
            // input drv deliberately not on disk; reading it would mark unknown
            &[("gggggggggggggggggggggggggggggggg-gone.drv", &["out"])],
        );

        let subs: Vec<Box<dyn Substituter>> =
            vec![Box::new(StaticSubstituter::new([fx.path(out)]))];
        let missing = query_missing(&fx.store, &subs, &drv);

        assert!(missing.will_build.is_empty());
        assert!(missing.unknown.is_empty());
        assert_eq!(
            missing.will_substitute.into_iter().collect::<Vec<_>>(),
            vec![fx.path(out)]
        );
    }

    /// A chain job → dep → upstream where the dep must be built and the
    /// upstream output is substitutable: the dep's drv lands in will_build,
    /// the upstream output in will_substitute.
    #[test]
    fn build_recurses_into_inputs() {
        let fx = Fixture::new();
        let upstream_out = "uuuuuuuuuuuuuuuuuuuuuuuuuuuuuuuu-upstream";
        let upstream = fx.add_drv(
            "cccccccccccccccccccccccccccccccc-upstream.drv",
            &[("out", upstream_out)],
            &[],
        );
        let dep = fx.add_drv(
            "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-dep.drv",
            &[("out", "dddddddddddddddddddddddddddddddd-dep")],
            &[("cccccccccccccccccccccccccccccccc-upstream.drv", &["out"])],
        );
        let job = fx.add_drv(
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-job.drv",
            &[("out", "jjjjjjjjjjjjjjjjjjjjjjjjjjjjjjjj-job")],
            &[("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-dep.drv", &["out"])],
        );

        let subs: Vec<Box<dyn Substituter>> =
            vec![Box::new(StaticSubstituter::new([fx.path(upstream_out)]))];
        let missing = query_missing(&fx.store, &subs, &job);

        let builds: Vec<&str> = missing.will_build.iter().map(|p| p.as_str()).collect();
        assert!(builds.contains(&job.as_str()));
        assert!(builds.contains(&dep.as_str()));
        assert!(!builds.contains(&upstream.as_str()));
        assert_eq!(
            missing.will_substitute.into_iter().collect::<Vec<_>>(),
            vec![fx.path(upstream_out)]
        );
    }

    /// An unreadable derivation is reported as unknown rather than crashing
    /// the classification.
    #[test]
    fn unreadable_drv_is_unknown() {
        let fx = Fixture::new();
        let gone = fx.path("gggggggggggggggggggggggggggggggg-gone.drv");
        let missing = query_missing(&fx.store, &no_subs(), &gone);
        assert_eq!(missing.unknown.len(), 1);
        assert!(!missing.is_cached());
    }
}
