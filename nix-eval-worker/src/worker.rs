// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! The worker loop.
//!
//! One synchronous loop per process: read a request line, evaluate, write
//! one response line, flush. No internal concurrency, no retries. A fatal
//! evaluator condition aborts the loop with an error naming the attribute
//! being evaluated; the driver observes the resulting EOF.

use std::io::{BufRead, Write};

use thiserror::Error;

use crate::config::WorkerConfig;
use crate::eval::{Eval, EvalError};
use crate::record::{Request, Response};
use crate::wrapper::Walker;

/// Internal argv marker the driver spawns workers with.
pub const WORKER_ARG: &str = "__worker";
/// `argv[0]` for worker processes, so they are distinguishable in `ps`.
pub const WORKER_ARGV0: &str = "nix-eval-jobs-worker";

/// Handshake line confirming the root loaded.
pub const READY_LINE: &str = r#"{"event":"ready"}"#;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{source}, while evaluating attribute '{attr}'")]
    Eval {
        attr: String,
        #[source]
        source: EvalError,
    },

    #[error(transparent)]
    Load(#[from] EvalError),

    #[error("invalid request '{line}': {source}")]
    Protocol {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl WorkerError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Cap the worker's own address space. Called before the evaluator does any
/// real work; the operating system kills us if the evaluator outgrows it.
pub fn apply_memory_limit(megabytes: u64) -> Result<(), WorkerError> {
    let bytes = megabytes.saturating_mul(1024 * 1024);
    nix::sys::resource::setrlimit(nix::sys::resource::Resource::RLIMIT_AS, bytes, bytes)
        .map_err(|e| WorkerError::io("failed to set memory limit", e.into()))
}

/// Run the worker loop until the request stream ends.
///
/// Returns `Ok(())` on an orderly shutdown (EOF or empty line). Any `Err` is
/// a fatal condition: the caller reports it on stderr and exits non-zero.
pub fn run_worker<E: Eval>(
    eval: E,
    config: &WorkerConfig,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<(), WorkerError> {
    let mut walker = Walker::new(eval, config)?;

    writeln!(output, "{READY_LINE}")
        .and_then(|()| output.flush())
        .map_err(|e| WorkerError::io("failed to send handshake", e))?;

    for line in input.lines() {
        let line = line.map_err(|e| WorkerError::io("failed to read request", e))?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let request: Request =
            serde_json::from_str(line).map_err(|source| WorkerError::Protocol {
                line: line.to_string(),
                source,
            })?;

        log::debug!("evaluating {}", request.path.render());
        let reply = walker.probe(&request.path).map_err(|source| WorkerError::Eval {
            attr: request.path.render(),
            source,
        })?;

        let response = Response {
            tag: request.tag,
            reply,
        };
        let encoded = serde_json::to_string(&response)?;
        writeln!(output, "{encoded}")
            .and_then(|()| output.flush())
            .map_err(|e| WorkerError::io("failed to write response", e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr_path::Selector;
    use crate::config::EvalOptions;
    use crate::fake::{FakeEval, FakeValue};
    use crate::record::Reply;
    use crate::source::RootSource;

    fn config() -> WorkerConfig {
        WorkerConfig {
            source: RootSource::expression("{ }"),
            opts: EvalOptions::default(),
        }
    }

    fn run(root: FakeValue, requests: &str) -> Vec<Response> {
        run_with(FakeEval::new(root), config(), requests).unwrap()
    }

    fn run_with(
        eval: FakeEval,
        config: WorkerConfig,
        requests: &str,
    ) -> Result<Vec<Response>, WorkerError> {
        let mut output = Vec::new();
        run_worker(eval, &config, requests.as_bytes(), &mut output)?;
        let text = String::from_utf8(output).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(READY_LINE));
        Ok(lines
            .map(|l| serde_json::from_str(l).expect(l))
            .collect())
    }

    fn simple_root() -> FakeValue {
        FakeValue::attrs([
            (
                "builtJob",
                FakeValue::derivation(
                    "job1",
                    "/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-job1.drv",
                    &[("out", "/nix/store/bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-job1")],
                ),
            ),
            (
                "recurse",
                FakeValue::attrs([
                    ("recurseForDerivations", FakeValue::Bool(true)),
                    (
                        "drvB",
                        FakeValue::derivation(
                            "job2",
                            "/nix/store/cccccccccccccccccccccccccccccccc-job2.drv",
                            &[("out", "/nix/store/dddddddddddddddddddddddddddddddd-job2")],
                        ),
                    ),
                ]),
            ),
        ])
    }

    /// The root attrset always expands; a derivation leaf produces a record
    /// with its outputs.
    #[test]
    fn walks_root_and_materializes_derivations() {
        let responses = run(
            simple_root(),
            "{\"path\":[],\"tag\":0}\n{\"path\":[\"builtJob\"],\"tag\":1}\n",
        );

        let Reply::Attrs { children } = &responses[0].reply else {
            panic!("expected attrs, got {:?}", responses[0].reply);
        };
        assert_eq!(
            children,
            &[Selector::name("builtJob"), Selector::name("recurse")]
        );

        let Reply::Drv { record } = &responses[1].reply else {
            panic!("expected drv, got {:?}", responses[1].reply);
        };
        assert_eq!(responses[1].tag, 1);
        assert_eq!(record.attr, "builtJob");
        assert_eq!(record.name, "job1");
        assert_eq!(
            record.outputs["out"],
            "/nix/store/bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-job1"
        );
        assert_eq!(record.system.as_deref(), Some("x86_64-linux"));
    }

    /// Marked subtrees expand; unmarked ones yield nothing.
    #[test]
    fn recursion_requires_the_marker() {
        let root = simple_root().with_attr(
            "plain",
            FakeValue::attrs([(
                "hidden",
                FakeValue::derivation(
                    "hidden",
                    "/nix/store/eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee-hidden.drv",
                    &[],
                ),
            )]),
        );
        let responses = run(
            root,
            "{\"path\":[\"recurse\"],\"tag\":0}\n{\"path\":[\"plain\"],\"tag\":1}\n",
        );

        let Reply::Attrs { children } = &responses[0].reply else {
            panic!("expected attrs");
        };
        assert_eq!(
            children,
            &[Selector::name("drvB"), Selector::name("recurseForDerivations")]
        );
        assert_eq!(responses[1].reply, Reply::Nothing);
    }

    /// `--force-recurse` expands unmarked sets too.
    #[test]
    fn force_recurse_expands_unmarked_sets() {
        let root = FakeValue::attrs([(
            "plain",
            FakeValue::attrs([("x", FakeValue::Int(1))]),
        )]);
        let mut config = config();
        config.opts.force_recurse = true;
        let responses = run_with(
            FakeEval::new(root),
            config,
            "{\"path\":[\"plain\"],\"tag\":0}\n",
        )
        .unwrap();
        assert!(matches!(&responses[0].reply, Reply::Attrs { .. }));
    }

    /// Lists expand by index when the traversal reaches them.
    #[test]
    fn lists_expand_by_index() {
        let root = FakeValue::List(vec![
            FakeValue::derivation(
                "job1",
                "/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-job1.drv",
                &[],
            ),
            FakeValue::derivation(
                "job2",
                "/nix/store/cccccccccccccccccccccccccccccccc-job2.drv",
                &[],
            ),
        ]);
        let responses = run(root, "{\"path\":[],\"tag\":0}\n{\"path\":[1],\"tag\":1}\n");

        let Reply::Attrs { children } = &responses[0].reply else {
            panic!("expected attrs");
        };
        assert_eq!(children, &[Selector::Index(0), Selector::Index(1)]);

        let Reply::Drv { record } = &responses[1].reply else {
            panic!("expected drv");
        };
        assert_eq!(record.attr, "1");
        assert_eq!(record.name, "job2");
    }

    #[test]
    fn missing_attributes_do_not_exist() {
        let responses = run(
            simple_root(),
            "{\"path\":[\"recurse\",\"nope\"],\"tag\":0}\n",
        );
        assert_eq!(
            responses[0].reply,
            Reply::Error {
                error: "recurse.nope: does not exist".into(),
                attr_name: None,
            }
        );
    }

    /// A throwing attribute becomes an error record naming the attribute;
    /// the worker keeps serving.
    #[test]
    fn recoverable_errors_become_error_replies() {
        let root = simple_root().with_attr("broken", FakeValue::thunk("package is marked broken"));
        let responses = run(
            root,
            "{\"path\":[\"broken\"],\"tag\":0}\n{\"path\":[\"builtJob\"],\"tag\":1}\n",
        );
        assert_eq!(
            responses[0].reply,
            Reply::Error {
                error: "package is marked broken".into(),
                attr_name: Some("broken".into()),
            }
        );
        assert!(matches!(&responses[1].reply, Reply::Drv { .. }));
    }

    /// Functions are refused, not evaluated.
    #[test]
    fn functions_are_blocked() {
        let root = simple_root().with_attr("fn", FakeValue::Function);
        let responses = run(root, "{\"path\":[\"fn\"],\"tag\":0}\n");
        assert_eq!(responses[0].reply, Reply::Blocked);
    }

    /// Infinite recursion is fatal: the loop aborts with an error naming the
    /// attribute, matching what the driver prints to stderr.
    #[test]
    fn infinite_recursion_kills_the_worker() {
        let root =
            simple_root().with_attr("packageWithInfiniteRecursion", FakeValue::InfiniteRecursion);
        let err = run_with(
            FakeEval::new(root),
            config(),
            "{\"path\":[\"packageWithInfiniteRecursion\"],\"tag\":0}\n",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("possible infinite recursion"), "{message}");
        assert!(message.contains("packageWithInfiniteRecursion"), "{message}");
    }

    /// A dotted attribute renders quoted in `attr` but plain in `attrPath`.
    #[test]
    fn dotted_attrs_render_quoted() {
        let root = FakeValue::attrs([(
            "dotted.attr",
            FakeValue::derivation(
                "dotted",
                "/nix/store/ffffffffffffffffffffffffffffffff-dotted.drv",
                &[],
            ),
        )]);
        let responses = run(root, "{\"path\":[\"dotted.attr\"],\"tag\":0}\n");
        let Reply::Drv { record } = &responses[0].reply else {
            panic!("expected drv");
        };
        assert_eq!(record.attr, "\"dotted.attr\"");
        assert_eq!(
            serde_json::to_value(&record.attr_path).unwrap(),
            serde_json::json!(["dotted.attr"])
        );
    }

    /// An empty line asks the worker to exit cleanly.
    #[test]
    fn empty_line_stops_the_loop() {
        let responses = run(simple_root(), "\n{\"path\":[],\"tag\":0}\n");
        assert!(responses.is_empty());
    }
}
