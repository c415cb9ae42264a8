// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! The evaluation root: a flake output, a source file, or an inline
//! expression.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RootSource {
    Flake {
        reference: String,
        /// Attribute path inside the flake outputs; `hydraJobs` when the
        /// flake reference carries no `#` fragment.
        fragment: String,
    },
    File {
        path: PathBuf,
    },
    Expression {
        text: String,
    },
}

impl RootSource {
    /// Split a `REF[#ATTR]` flake installable.
    pub fn flake(installable: &str) -> Self {
        let (reference, fragment) = match installable.split_once('#') {
            Some((r, f)) if !f.is_empty() => (r.to_string(), f.to_string()),
            Some((r, _)) => (r.to_string(), "hydraJobs".to_string()),
            None => (installable.to_string(), "hydraJobs".to_string()),
        };
        RootSource::Flake {
            reference,
            fragment,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        RootSource::File { path: path.into() }
    }

    pub fn expression(text: impl Into<String>) -> Self {
        RootSource::Expression { text: text.into() }
    }

    pub fn needs_flakes(&self) -> bool {
        matches!(self, RootSource::Flake { .. })
    }

    /// The Nix expression evaluating to the root value.
    ///
    /// File and inline roots that evaluate to a function are auto-called
    /// with `{ }`, so `{ pkgs ? import <nixpkgs> { } }: …` files work
    /// unmodified.
    pub fn loader_expr(&self) -> String {
        match self {
            RootSource::Flake {
                reference,
                fragment,
            } => {
                let mut expr = format!("(builtins.getFlake {})", nix_string(reference));
                for segment in fragment.split('.') {
                    expr.push('.');
                    expr.push_str(&nix_string(segment));
                }
                expr
            }
            RootSource::File { path } => format!(
                "(let raw = import (/. + {}); in if builtins.isFunction raw then raw {{ }} else raw)",
                nix_string(&path.display().to_string())
            ),
            RootSource::Expression { text } => format!(
                "(let raw = ({text}\n); in if builtins.isFunction raw then raw {{ }} else raw)"
            ),
        }
    }
}

impl fmt::Display for RootSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootSource::Flake {
                reference,
                fragment,
            } => write!(f, "flake {reference}#{fragment}"),
            RootSource::File { path } => write!(f, "file {}", path.display()),
            RootSource::Expression { .. } => f.write_str("inline expression"),
        }
    }
}

/// Render a Rust string as a Nix string literal.
pub fn nix_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flake_fragment_defaults_to_hydra_jobs() {
        assert_eq!(
            RootSource::flake("github:owner/repo"),
            RootSource::Flake {
                reference: "github:owner/repo".into(),
                fragment: "hydraJobs".into(),
            }
        );
        assert_eq!(
            RootSource::flake(".#checks.x86_64-linux"),
            RootSource::Flake {
                reference: ".".into(),
                fragment: "checks.x86_64-linux".into(),
            }
        );
    }

    #[test]
    fn loader_navigates_flake_fragment() {
        let src = RootSource::flake(".#packages.default");
        assert_eq!(
            src.loader_expr(),
            r#"(builtins.getFlake ".")."packages"."default""#
        );
    }

    #[test]
    fn nix_string_escapes_interpolation() {
        assert_eq!(nix_string(r#"a"b"#), r#""a\"b""#);
        assert_eq!(nix_string(r"a\b"), r#""a\\b""#);
        assert_eq!(nix_string("a${b}"), r#""a\${b}""#);
        assert_eq!(nix_string("a$b"), r#""a$b""#);
    }
}
