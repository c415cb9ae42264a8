// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Attribute paths: where a value lives inside the root tree.
//!
//! A path is a sequence of selectors, either attribute names or list
//! indices. The human rendering joins segments with `.`, quoting names that
//! themselves contain a dot, so `recurse.drvB` and `"dotted.attr"` round-trip
//! unambiguously for a reader. On the wire and in records a path is a JSON
//! array of strings and numbers.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    Index(u64),
    Name(String),
}

impl Selector {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Selector::Name(n) => Some(n),
            Selector::Index(_) => None,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Index(i) => write!(f, "{i}"),
            Selector::Name(n) if n.contains('.') => {
                write!(f, "\"{}\"", n.replace('\\', "\\\\").replace('"', "\\\""))
            }
            Selector::Name(n) => f.write_str(n),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrPath(Vec<Selector>);

impl AttrPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(selectors: Vec<Selector>) -> Self {
        Self(selectors)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.0
    }

    pub fn child(&self, selector: Selector) -> Self {
        let mut selectors = self.0.clone();
        selectors.push(selector);
        Self(selectors)
    }

    /// The name of the last selector, used as `attrName` on error records.
    pub fn last_name(&self) -> Option<&str> {
        self.0.last().and_then(Selector::as_name)
    }

    /// The dot-joined human rendering, as used in the `attr` record field.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, selector) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{selector}")?;
        }
        Ok(())
    }
}

/// Segment-wise glob matching between a constituent pattern and a rendered
/// attribute path. Both sides are split on `.`; a `*` segment matches any
/// single segment, everything else matches literally.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let candidate: Vec<&str> = candidate.split('.').collect();
    pattern.len() == candidate.len()
        && pattern
            .iter()
            .zip(&candidate)
            .all(|(p, c)| *p == "*" || p == c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_dotted_names_quoted() {
        let path = AttrPath::new(vec![Selector::name("dotted.attr")]);
        assert_eq!(path.render(), "\"dotted.attr\"");

        let nested = AttrPath::new(vec![Selector::name("recurse"), Selector::name("drvB")]);
        assert_eq!(nested.render(), "recurse.drvB");

        let indexed = AttrPath::new(vec![Selector::Index(0)]);
        assert_eq!(indexed.render(), "0");
    }

    #[test]
    fn serializes_as_array_of_strings_and_numbers() {
        let path = AttrPath::new(vec![
            Selector::name("dotted.attr"),
            Selector::Index(3),
            Selector::name("x"),
        ]);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["dotted.attr",3,"x"]"#);

        let back: AttrPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn glob_matching_is_segment_wise() {
        assert!(glob_matches("tests.*", "tests.fast"));
        assert!(glob_matches("*.release", "jobs.release"));
        assert!(!glob_matches("tests.*", "tests.nested.deep"));
        assert!(!glob_matches("tests.*", "checks.fast"));
        assert!(glob_matches("jobs", "jobs"));
        assert!(!glob_matches("jobs", "job"));
    }
}
