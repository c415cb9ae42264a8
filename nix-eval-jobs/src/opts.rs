// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use clap::Parser;

use nix_eval_worker::{EvalOptions, RootSource, WorkerConfig};

use crate::error::DriverError;

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parallel evaluator for Nix package trees. Walks an attribute tree across
/// a pool of evaluator processes and prints one JSON record per derivation.
#[derive(Parser, Debug, Clone)]
#[command(name = "nix-eval-jobs", version, about)]
pub struct Opts {
    /// Flake installable to evaluate (FLAKEREF[#ATTR], default attribute
    /// `hydraJobs`).
    #[arg(long, conflicts_with_all = ["file", "expr"])]
    pub flake: Option<String>,

    /// Nix file to evaluate (functions are auto-called with `{ }`).
    pub file: Option<PathBuf>,

    /// Inline expression to evaluate.
    #[arg(short = 'E', long = "expr", conflicts_with = "file")]
    pub expr: Option<String>,

    /// Number of evaluator workers.
    #[arg(long, default_value_t = default_workers())]
    pub workers: usize,

    /// Directory to write per-derivation GC-root symlinks into.
    #[arg(long)]
    pub gc_roots_dir: Option<PathBuf>,

    /// Address-space cap per worker, in MiB.
    #[arg(long, value_name = "MB")]
    pub max_memory_size: Option<u64>,

    /// Include `meta` on derivation records.
    #[arg(long)]
    pub meta: bool,

    /// Query local validity and substituters, emitting `cacheStatus`,
    /// `neededBuilds` and `neededSubstitutes`.
    #[arg(long)]
    pub check_cache_status: bool,

    /// Emit `inputDrvs` read from the instantiated derivation.
    #[arg(long)]
    pub show_input_drvs: bool,

    /// Resolve aggregate constituents to concrete derivation paths.
    #[arg(long)]
    pub constituents: bool,

    /// One-argument function applied to every derivation; its result is
    /// emitted as `extraValue`.
    #[arg(long, value_name = "EXPR")]
    pub apply: Option<String>,

    /// One-argument function applied to the root value before traversal.
    #[arg(long, value_name = "EXPR")]
    pub select: Option<String>,

    /// Compute derivation paths without writing them to the store.
    /// Disables `inputDrvs` and cache-status fields.
    #[arg(long)]
    pub no_instantiate: bool,

    /// Recurse into attribute sets not marked `recurseForDerivations`.
    #[arg(long)]
    pub force_recurse: bool,

    /// Stop scheduling new work after the first evaluation error and exit
    /// non-zero.
    #[arg(long)]
    pub quit_on_error: bool,

    /// Binary caches consulted by --check-cache-status.
    #[arg(
        long,
        value_name = "URL",
        value_delimiter = ',',
        default_value = "https://cache.nixos.org"
    )]
    pub substituters: Vec<String>,
}

impl Opts {
    pub fn root_source(&self) -> Result<RootSource, DriverError> {
        match (&self.flake, &self.file, &self.expr) {
            (Some(flake), None, None) => Ok(RootSource::flake(flake)),
            (None, Some(file), None) => {
                let path = std::path::absolute(file)
                    .map_err(|e| DriverError::io(format!("cannot resolve {}", file.display()), e))?;
                Ok(RootSource::file(path))
            }
            (None, None, Some(expr)) => Ok(RootSource::expression(expr)),
            _ => Err(DriverError::usage(
                "exactly one of --flake, FILE, or --expr must be given",
            )),
        }
    }

    pub fn worker_config(&self) -> Result<WorkerConfig, DriverError> {
        Ok(WorkerConfig {
            source: self.root_source()?,
            opts: EvalOptions {
                meta: self.meta,
                check_cache_status: self.check_cache_status,
                show_input_drvs: self.show_input_drvs,
                no_instantiate: self.no_instantiate,
                force_recurse: self.force_recurse,
                apply: self.apply.clone(),
                select: self.select.clone(),
                gc_roots_dir: self.gc_roots_dir.clone(),
                store_dir: None,
                real_store_dir: None,
                substituters: self.substituters.clone(),
                max_memory_mb: self.max_memory_size,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        Opts::try_parse_from(std::iter::once("nix-eval-jobs").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flake_fragment_is_forwarded() {
        let opts = parse(&["--flake", ".#hydraJobs"]);
        assert_eq!(
            opts.root_source().unwrap(),
            RootSource::Flake {
                reference: ".".into(),
                fragment: "hydraJobs".into(),
            }
        );
    }

    #[test]
    fn exactly_one_installable_is_required() {
        let opts = parse(&["--workers", "2"]);
        assert!(matches!(
            opts.root_source(),
            Err(DriverError::Usage(_))
        ));
        assert!(
            Opts::try_parse_from(["nix-eval-jobs", "--flake", ".", "ci.nix"]).is_err(),
            "conflicting installables must be rejected by the parser"
        );
    }

    #[test]
    fn substituters_split_on_commas() {
        let opts = parse(&["-E", "{ }", "--substituters", "https://a.example,https://b.example"]);
        assert_eq!(opts.substituters, vec!["https://a.example", "https://b.example"]);

        let defaulted = parse(&["-E", "{ }"]);
        assert_eq!(defaulted.substituters, vec!["https://cache.nixos.org"]);
    }
}
