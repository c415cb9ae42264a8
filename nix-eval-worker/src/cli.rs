// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! The production evaluator: a thin driver around `nix-instantiate`.
//!
//! Each value handle is a Nix accessor expression rooted at the loaded
//! source. Forcing a handle runs one `nix-instantiate --eval --json` probe
//! whose result is cached on the handle, so repeated classification of the
//! same node costs one evaluator call. Instantiation is a forced
//! `.drvPath`, which writes the derivation to the store as a side effect;
//! the hash-only variant runs the same probe under `--readonly-mode`.
//!
//! Selecting and indexing never touch the evaluator at all, they only
//! extend the accessor, so the walk stays as lazy as the language itself.

use std::process::Command;

use serde::Deserialize;

use crate::eval::{Eval, EvalError, EvalResult, Forced, Value};
use crate::source::{RootSource, nix_string};

pub struct NixEval {
    program: String,
    /// `let root = <loader>; in`, prefixed to every probe.
    prelude: String,
    needs_flakes: bool,
    values: Vec<Slot>,
}

struct Slot {
    accessor: String,
    forced: Option<Forced>,
}

/// Shape returned by the classification probe expression.
#[derive(Deserialize)]
struct Probe {
    k: String,
    #[serde(default)]
    names: Option<Vec<String>>,
    #[serde(default)]
    len: Option<usize>,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

impl NixEval {
    pub fn new() -> Self {
        Self {
            program: "nix-instantiate".into(),
            prelude: String::new(),
            needs_flakes: false,
            values: Vec::new(),
        }
    }

    /// Use a different `nix-instantiate` binary (e.g. from `NIX_BIN_DIR`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn alloc(&mut self, accessor: String) -> Value {
        self.values.push(Slot {
            accessor,
            forced: None,
        });
        Value(self.values.len() - 1)
    }

    fn accessor(&self, v: Value) -> &str {
        &self.values[v.0].accessor
    }

    /// Run one evaluation, returning its JSON output.
    fn run(&self, body: &str, readonly: bool) -> EvalResult<serde_json::Value> {
        let expr = format!("{}{}", self.prelude, body);
        let mut cmd = Command::new(&self.program);
        cmd.arg("--eval")
            .arg("--json")
            .arg("--strict")
            .arg("--expr")
            .arg(&expr);
        if self.needs_flakes {
            cmd.arg("--extra-experimental-features").arg("flakes");
        }
        if readonly {
            cmd.arg("--readonly-mode");
        }

        log::debug!("evaluating: {body}");
        let output = cmd
            .output()
            .map_err(|e| EvalError::fatal(format!("failed to run {}: {e}", self.program)))?;

        if output.status.success() {
            serde_json::from_slice(&output.stdout).map_err(|e| {
                EvalError::fatal(format!("unparseable evaluator output: {e}"))
            })
        } else {
            Err(classify_failure(
                &String::from_utf8_lossy(&output.stderr),
                output.status.code(),
            ))
        }
    }

    fn probe(&self, v: Value) -> EvalResult<Forced> {
        // One alternative per value shape; only the scalar arms carry the
        // value itself, attribute sets surface their names and lists their
        // length.
        let body = format!(
            "let __v = {}; in \
             if builtins.isAttrs __v then {{ k = \"attrs\"; names = builtins.attrNames __v; }} \
             else if builtins.isList __v then {{ k = \"list\"; len = builtins.length __v; }} \
             else if builtins.isString __v then {{ k = \"string\"; value = __v; }} \
             else if builtins.isPath __v then {{ k = \"string\"; value = toString __v; }} \
             else if builtins.isBool __v then {{ k = \"bool\"; value = __v; }} \
             else if builtins.isInt __v then {{ k = \"int\"; value = __v; }} \
             else if builtins.isFloat __v then {{ k = \"float\"; value = __v; }} \
             else if __v == null then {{ k = \"null\"; }} \
             else if builtins.isFunction __v then {{ k = \"function\"; }} \
             else {{ k = \"other\"; }}",
            self.accessor(v)
        );
        let probe: Probe = serde_json::from_value(self.run(&body, false)?)
            .map_err(|e| EvalError::fatal(format!("malformed probe result: {e}")))?;

        Ok(match probe.k.as_str() {
            "attrs" => Forced::Attrs {
                names: probe.names.unwrap_or_default(),
            },
            "list" => Forced::List {
                len: probe.len.unwrap_or_default(),
            },
            "string" => Forced::String(
                probe
                    .value
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default(),
            ),
            "bool" => Forced::Bool(probe.value.and_then(|v| v.as_bool()).unwrap_or_default()),
            "int" => Forced::Int(probe.value.and_then(|v| v.as_i64()).unwrap_or_default()),
            "float" => Forced::Float(probe.value.and_then(|v| v.as_f64()).unwrap_or_default()),
            "null" => Forced::Null,
            "function" => Forced::Function,
            _ => Forced::Other,
        })
    }

    fn drv_path(&mut self, v: Value, readonly: bool) -> EvalResult<String> {
        let body = format!(
            "builtins.unsafeDiscardStringContext ({}).drvPath",
            self.accessor(v)
        );
        match self.run(&body, readonly)? {
            serde_json::Value::String(path) => Ok(path),
            other => Err(EvalError::new(format!(
                "drvPath did not evaluate to a string but to {other}"
            ))),
        }
    }
}

impl Default for NixEval {
    fn default() -> Self {
        Self::new()
    }
}

impl Eval for NixEval {
    fn load_root(&mut self, source: &RootSource) -> EvalResult<Value> {
        self.needs_flakes = source.needs_flakes();
        self.prelude = format!("let root = {}; in ", source.loader_expr());
        let root = self.alloc("root".into());
        // Force eagerly so a broken root fails the handshake, not the first
        // job. Escalate whatever goes wrong: there is no per-attribute
        // recovery for the root itself.
        match self.force(root) {
            Ok(_) => Ok(root),
            Err(e) => Err(EvalError::fatal(e.message)),
        }
    }

    fn force(&mut self, v: Value) -> EvalResult<Forced> {
        if let Some(forced) = &self.values[v.0].forced {
            return Ok(forced.clone());
        }
        let forced = self.probe(v)?;
        self.values[v.0].forced = Some(forced.clone());
        Ok(forced)
    }

    fn select(&mut self, v: Value, name: &str) -> EvalResult<Option<Value>> {
        match self.force(v)? {
            Forced::Attrs { names } if names.iter().any(|n| n == name) => {
                let accessor = format!("({}).{}", self.accessor(v), nix_string(name));
                Ok(Some(self.alloc(accessor)))
            }
            _ => Ok(None),
        }
    }

    fn index(&mut self, v: Value, idx: usize) -> EvalResult<Option<Value>> {
        match self.force(v)? {
            Forced::List { len } if idx < len => {
                let accessor = format!("builtins.elemAt ({}) {idx}", self.accessor(v));
                Ok(Some(self.alloc(accessor)))
            }
            _ => Ok(None),
        }
    }

    fn to_json(&mut self, v: Value) -> EvalResult<serde_json::Value> {
        let body = format!("({})", self.accessor(v));
        self.run(&body, false)
    }

    fn instantiate(&mut self, v: Value) -> EvalResult<String> {
        self.drv_path(v, false)
    }

    fn hash_derivation(&mut self, v: Value) -> EvalResult<String> {
        self.drv_path(v, true)
    }

    fn apply_expr(&mut self, expr: &str, v: Value) -> EvalResult<Value> {
        let accessor = format!("(({expr}\n)) ({})", self.accessor(v));
        Ok(self.alloc(accessor))
    }
}

/// Map an evaluator failure to an `EvalError`, deciding whether the worker
/// can keep going. Stack or allocation exhaustion leaves the evaluator in an
/// unusable state; an ordinary `throw`/`assert` does not.
fn classify_failure(stderr: &str, code: Option<i32>) -> EvalError {
    // nix-instantiate prints a multi-line trace; the summary is the line
    // carrying "error:".
    let message = stderr
        .lines()
        .find(|l| l.contains("error:"))
        .or_else(|| stderr.lines().find(|l| !l.trim().is_empty()))
        .unwrap_or("evaluator failed without diagnostics")
        .trim()
        .to_string();

    if stderr.contains("infinite recursion") || stderr.contains("stack overflow") {
        EvalError::fatal(format!("possible infinite recursion: {message}"))
    } else if stderr.contains("out of memory") || code.is_none() {
        // code None: killed by a signal, e.g. the memory cap.
        EvalError::fatal(message)
    } else {
        EvalError::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_recursion_is_fatal() {
        let err = classify_failure(
            "error: infinite recursion encountered\n       at /x.nix:3:5\n",
            Some(1),
        );
        assert!(err.is_fatal());
        assert!(err.message.contains("possible infinite recursion"));
    }

    #[test]
    fn ordinary_throws_are_recoverable() {
        let err = classify_failure("error: broken package, sorry\n", Some(1));
        assert!(!err.is_fatal());
        assert_eq!(err.message, "error: broken package, sorry");
    }

    #[test]
    fn signal_death_is_fatal() {
        assert!(classify_failure("", None).is_fatal());
    }
}
