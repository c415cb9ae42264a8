// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! The evaluator collaborator.
//!
//! The expression language has no static types, so everything downstream
//! works on opaque [`Value`] handles and the shallow [`Forced`] view obtained
//! by forcing one to weak-head normal form. The trait is the full set of
//! capabilities the driver needs from an evaluator; the production
//! implementation drives `nix-instantiate` (see [`crate::cli`]), and tests
//! substitute a deterministic in-memory one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::RootSource;

/// Handle to a (possibly unevaluated) value owned by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(pub(crate) usize);

/// The weak-head normal form of a value, as much of it as classification
/// needs: attribute sets expose their (sorted) names, lists their length,
/// scalars their content. Deeper structure stays lazy behind `select` and
/// `index`.
#[derive(Debug, Clone, PartialEq)]
pub enum Forced {
    Attrs { names: Vec<String> },
    List { len: usize },
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Null,
    Function,
    Other,
}

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
    /// Fatal conditions (infinite recursion, evaluator crash) terminate the
    /// worker; everything else becomes an error record for one attribute.
    pub fatal: bool,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

pub trait Eval {
    /// Load the evaluation root. Failure here is always fatal for the
    /// worker: there is nothing to fall back to.
    fn load_root(&mut self, source: &RootSource) -> EvalResult<Value>;

    /// Force to weak-head normal form.
    fn force(&mut self, v: Value) -> EvalResult<Forced>;

    /// Select a named attribute, forcing only the head of `v`. `Ok(None)`
    /// when the attribute does not exist or the value is not an attribute
    /// set.
    fn select(&mut self, v: Value, name: &str) -> EvalResult<Option<Value>>;

    /// Index into a list, forcing only the head of `v`. `Ok(None)` when out
    /// of bounds or the value is not a list.
    fn index(&mut self, v: Value, idx: usize) -> EvalResult<Option<Value>>;

    /// Deep-force a value and convert it to JSON (for `meta` and
    /// `extraValue`).
    fn to_json(&mut self, v: Value) -> EvalResult<serde_json::Value>;

    /// Instantiate a derivation value into the store and return its
    /// `drvPath`.
    fn instantiate(&mut self, v: Value) -> EvalResult<String>;

    /// Compute a derivation value's `drvPath` without writing to the store.
    fn hash_derivation(&mut self, v: Value) -> EvalResult<String>;

    /// Apply a user-supplied one-argument function (given as expression
    /// text) to a value.
    fn apply_expr(&mut self, expr: &str, v: Value) -> EvalResult<Value>;
}
