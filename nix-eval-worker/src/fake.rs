// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! A deterministic in-memory evaluator for tests.
//!
//! Models the parts of the expression language the driver is sensitive to:
//! attribute sets with sorted names, lists, scalars, functions, and lazy
//! failures: a [`FakeValue::Thunk`] only throws when forced, and
//! [`FakeValue::InfiniteRecursion`] forces to the fatal condition a real
//! evaluator reports for divergent values.

use std::collections::BTreeMap;

use crate::eval::{Eval, EvalError, EvalResult, Forced, Value};
use crate::source::RootSource;

#[derive(Debug, Clone, PartialEq)]
pub enum FakeValue {
    Attrs(BTreeMap<String, FakeValue>),
    List(Vec<FakeValue>),
    Str(String),
    Bool(bool),
    Int(i64),
    Null,
    Function,
    /// Throws when forced.
    Thunk { message: String },
    /// Forces to the evaluator's fatal infinite-recursion condition.
    InfiniteRecursion,
}

impl FakeValue {
    pub fn attrs<const N: usize>(entries: [(&str, FakeValue); N]) -> Self {
        FakeValue::Attrs(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn string(s: impl Into<String>) -> Self {
        FakeValue::Str(s.into())
    }

    pub fn thunk(message: impl Into<String>) -> Self {
        FakeValue::Thunk {
            message: message.into(),
        }
    }

    /// A well-formed derivation value with the given outputs
    /// (`name` → `outPath`).
    pub fn derivation(name: &str, drv_path: &str, outputs: &[(&str, &str)]) -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert("type".into(), FakeValue::string("derivation"));
        attrs.insert("name".into(), FakeValue::string(name));
        attrs.insert("system".into(), FakeValue::string("x86_64-linux"));
        attrs.insert("drvPath".into(), FakeValue::string(drv_path));
        attrs.insert(
            "outputs".into(),
            FakeValue::List(
                outputs
                    .iter()
                    .map(|(out_name, _)| FakeValue::string(*out_name))
                    .collect(),
            ),
        );
        for (out_name, out_path) in outputs {
            attrs.insert(
                out_name.to_string(),
                FakeValue::attrs([("outPath", FakeValue::string(*out_path))]),
            );
        }
        FakeValue::Attrs(attrs)
    }

    /// Add or replace an attribute on an attribute-set value.
    pub fn with_attr(mut self, name: &str, value: FakeValue) -> Self {
        if let FakeValue::Attrs(attrs) = &mut self {
            attrs.insert(name.to_string(), value);
        }
        self
    }
}

type FakeFn = fn(&FakeValue) -> FakeValue;

pub struct FakeEval {
    root: FakeValue,
    values: Vec<FakeValue>,
    functions: BTreeMap<String, FakeFn>,
}

impl FakeEval {
    pub fn new(root: FakeValue) -> Self {
        Self {
            root,
            values: Vec::new(),
            functions: BTreeMap::new(),
        }
    }

    /// Register the behavior of an `apply`/`select` expression.
    pub fn with_function(mut self, expr: impl Into<String>, f: FakeFn) -> Self {
        self.functions.insert(expr.into(), f);
        self
    }

    fn alloc(&mut self, value: FakeValue) -> Value {
        self.values.push(value);
        Value(self.values.len() - 1)
    }

    fn get(&self, v: Value) -> &FakeValue {
        &self.values[v.0]
    }

    fn force_error(value: &FakeValue) -> Option<EvalError> {
        match value {
            FakeValue::Thunk { message } => Some(EvalError::new(message.clone())),
            FakeValue::InfiniteRecursion => Some(EvalError::fatal(
                "possible infinite recursion encountered",
            )),
            _ => None,
        }
    }

    fn to_json_value(value: &FakeValue) -> EvalResult<serde_json::Value> {
        if let Some(e) = Self::force_error(value) {
            return Err(e);
        }
        Ok(match value {
            FakeValue::Attrs(attrs) => serde_json::Value::Object(
                attrs
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::to_json_value(v)?)))
                    .collect::<EvalResult<_>>()?,
            ),
            FakeValue::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Self::to_json_value)
                    .collect::<EvalResult<_>>()?,
            ),
            FakeValue::Str(s) => serde_json::Value::String(s.clone()),
            FakeValue::Bool(b) => serde_json::Value::Bool(*b),
            FakeValue::Int(i) => serde_json::Value::Number((*i).into()),
            FakeValue::Null => serde_json::Value::Null,
            FakeValue::Function => {
                return Err(EvalError::new("cannot convert a function to JSON"));
            }
            FakeValue::Thunk { .. } | FakeValue::InfiniteRecursion => unreachable!(),
        })
    }
}

impl Eval for FakeEval {
    fn load_root(&mut self, _source: &RootSource) -> EvalResult<Value> {
        let root = self.root.clone();
        if let Some(e) = Self::force_error(&root) {
            return Err(EvalError::fatal(e.message));
        }
        Ok(self.alloc(root))
    }

    fn force(&mut self, v: Value) -> EvalResult<Forced> {
        let value = self.get(v);
        if let Some(e) = Self::force_error(value) {
            return Err(e);
        }
        Ok(match value {
            FakeValue::Attrs(attrs) => Forced::Attrs {
                names: attrs.keys().cloned().collect(),
            },
            FakeValue::List(items) => Forced::List { len: items.len() },
            FakeValue::Str(s) => Forced::String(s.clone()),
            FakeValue::Bool(b) => Forced::Bool(*b),
            FakeValue::Int(i) => Forced::Int(*i),
            FakeValue::Null => Forced::Null,
            FakeValue::Function => Forced::Function,
            FakeValue::Thunk { .. } | FakeValue::InfiniteRecursion => unreachable!(),
        })
    }

    fn select(&mut self, v: Value, name: &str) -> EvalResult<Option<Value>> {
        let value = self.get(v);
        if let Some(e) = Self::force_error(value) {
            return Err(e);
        }
        match value {
            FakeValue::Attrs(attrs) => match attrs.get(name) {
                Some(child) => {
                    let child = child.clone();
                    Ok(Some(self.alloc(child)))
                }
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn index(&mut self, v: Value, idx: usize) -> EvalResult<Option<Value>> {
        let value = self.get(v);
        if let Some(e) = Self::force_error(value) {
            return Err(e);
        }
        match value {
            FakeValue::List(items) => match items.get(idx) {
                Some(child) => {
                    let child = child.clone();
                    Ok(Some(self.alloc(child)))
                }
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn to_json(&mut self, v: Value) -> EvalResult<serde_json::Value> {
        Self::to_json_value(self.get(v))
    }

    fn instantiate(&mut self, v: Value) -> EvalResult<String> {
        match self.select(v, "drvPath")? {
            Some(drv_path) => match self.force(drv_path)? {
                Forced::String(s) => Ok(s),
                _ => Err(EvalError::new("drvPath is not a string")),
            },
            None => Err(EvalError::new(
                "derivation is missing a 'drvPath' attribute",
            )),
        }
    }

    fn hash_derivation(&mut self, v: Value) -> EvalResult<String> {
        self.instantiate(v)
    }

    fn apply_expr(&mut self, expr: &str, v: Value) -> EvalResult<Value> {
        match self.functions.get(expr) {
            Some(f) => {
                let result = f(self.get(v));
                Ok(self.alloc(result))
            }
            None => Err(EvalError::new(format!("unknown test function '{expr}'"))),
        }
    }
}
