// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Parsing of on-disk `.drv` files.
//!
//! Derivations are stored in the ATerm format:
//!
//! ```text
//! Derive([("out","/nix/store/…-hello","","")],
//!        [("/nix/store/…-dep.drv",["out"])],
//!        ["/nix/store/…-src"],
//!        "x86_64-linux","/bin/sh",["-c","…"],[("k","v")])
//! ```
//!
//! Only the first four fields matter to the evaluation driver: outputs,
//! input derivations, input sources, and the platform. The builder, its
//! arguments, and the environment are parsed (the file must be well-formed)
//! but not retained.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{IoContext, StoreError};
use crate::store_path::StorePath;

/// The parts of a parsed derivation the driver cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    /// Output name → store path. `None` for floating content-addressed
    /// outputs, whose path is only known after the build.
    pub outputs: BTreeMap<String, Option<StorePath>>,
    /// Input derivation → the outputs of it that this derivation uses.
    pub input_drvs: BTreeMap<StorePath, BTreeSet<String>>,
    pub input_srcs: BTreeSet<StorePath>,
    pub platform: String,
}

impl Derivation {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Parser::new(text).parse_derivation()
    }

    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)
            .io_context(|| format!("failed to read derivation {}", path.display()))?;
        Self::parse(&text).map_err(|e| StoreError::DrvParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("at byte {offset}: {message}")]
pub struct ParseError {
    offset: usize,
    message: String,
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(self.error(format!(
                "expected '{}', found '{}'",
                byte as char, b as char
            ))),
            None => Err(self.error(format!("expected '{}', found end of input", byte as char))),
        }
    }

    fn expect_literal(&mut self, literal: &str) -> Result<(), ParseError> {
        if self.bytes[self.pos..].starts_with(literal.as_bytes()) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(self.error(format!("expected '{literal}'")))
        }
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return String::from_utf8(out)
                        .map_err(|_| self.error("string is not valid UTF-8"));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let escaped = self
                        .peek()
                        .ok_or_else(|| self.error("dangling escape at end of input"))?;
                    out.push(match escaped {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        other => other,
                    });
                    self.pos += 1;
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    /// Parse a comma-separated sequence between `open` and `close`.
    fn parse_seq<T>(
        &mut self,
        open: u8,
        close: u8,
        mut item: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        self.expect(open)?;
        let mut items = Vec::new();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error(format!("expected ',' or '{}'", close as char))),
            }
        }
    }

    fn parse_string_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.parse_seq(b'[', b']', |p| p.parse_string())
    }

    fn parse_store_path(&mut self) -> Result<StorePath, ParseError> {
        let raw = self.parse_string()?;
        StorePath::parse(raw).map_err(|e| self.error(e.to_string()))
    }

    /// `("out","/nix/store/…","","")`: name, path, hash algo, hash.
    fn parse_output(&mut self) -> Result<(String, Option<StorePath>), ParseError> {
        self.expect(b'(')?;
        let name = self.parse_string()?;
        self.expect(b',')?;
        let raw_path = self.parse_string()?;
        self.expect(b',')?;
        let _hash_algo = self.parse_string()?;
        self.expect(b',')?;
        let _hash = self.parse_string()?;
        self.expect(b')')?;
        let path = if raw_path.is_empty() {
            None
        } else {
            Some(StorePath::parse(raw_path).map_err(|e| self.error(e.to_string()))?)
        };
        Ok((name, path))
    }

    /// `("/nix/store/…-dep.drv",["out","dev"])`
    fn parse_input_drv(&mut self) -> Result<(StorePath, BTreeSet<String>), ParseError> {
        self.expect(b'(')?;
        let drv = self.parse_store_path()?;
        self.expect(b',')?;
        let outputs = self.parse_string_list()?.into_iter().collect();
        self.expect(b')')?;
        Ok((drv, outputs))
    }

    /// `("name","value")`
    fn parse_env_pair(&mut self) -> Result<(), ParseError> {
        self.expect(b'(')?;
        let _name = self.parse_string()?;
        self.expect(b',')?;
        let _value = self.parse_string()?;
        self.expect(b')')?;
        Ok(())
    }

    fn parse_derivation(&mut self) -> Result<Derivation, ParseError> {
        self.expect_literal("Derive(")?;

        let outputs = self
            .parse_seq(b'[', b']', |p| p.parse_output())?
            .into_iter()
            .collect();
        self.expect(b',')?;
        let input_drvs = self
            .parse_seq(b'[', b']', |p| p.parse_input_drv())?
            .into_iter()
            .collect();
        self.expect(b',')?;
        let input_srcs = self
            .parse_seq(b'[', b']', |p| p.parse_store_path())?
            .into_iter()
            .collect();
        self.expect(b',')?;
        let platform = self.parse_string()?;
        self.expect(b',')?;
        let _builder = self.parse_string()?;
        self.expect(b',')?;
        let _args = self.parse_string_list()?;
        self.expect(b',')?;
        self.parse_seq(b'[', b']', |p| p.parse_env_pair())?;
        self.expect(b')')?;

        Ok(Derivation {
            outputs,
            input_drvs,
            input_srcs,
            platform,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = concat!(
        r#"Derive([("out","/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-job1","","")],"#,
        r#"[("/nix/store/bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-dep.drv",["out","dev"])],"#,
        r#"["/nix/store/cccccccccccccccccccccccccccccccc-src"],"#,
        r#""x86_64-linux","/bin/sh",["-c","echo hi > $out"],"#,
        r#"[("builder","/bin/sh"),("name","job1")])"#
    );

    #[test]
    fn parses_a_simple_derivation() {
        let drv = Derivation::parse(SIMPLE).unwrap();
        assert_eq!(drv.platform, "x86_64-linux");
        assert_eq!(
            drv.outputs["out"].as_ref().unwrap().as_str(),
            "/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-job1"
        );
        let (dep, outs) = drv.input_drvs.iter().next().unwrap();
        assert_eq!(dep.base_name(), "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-dep.drv");
        assert_eq!(
            outs.iter().cloned().collect::<Vec<_>>(),
            vec!["dev".to_string(), "out".to_string()]
        );
        assert_eq!(drv.input_srcs.len(), 1);
    }

    /// Escapes inside env values must not derail the field scanner.
    #[test]
    fn parses_escaped_strings() {
        let text = r#"Derive([("out","/nix/store/dddddddddddddddddddddddddddddddd-x","","")],[],[],"x86_64-linux","/bin/sh",[],[("script","line one\nline \"two\"\\")])"#;
        let drv = Derivation::parse(text).unwrap();
        assert_eq!(drv.outputs.len(), 1);
    }

    /// Floating content-addressed outputs have an empty path field.
    #[test]
    fn floating_ca_output_has_no_path() {
        let text = r#"Derive([("out","","r:sha256","")],[],[],"x86_64-linux","/bin/sh",[],[])"#;
        let drv = Derivation::parse(text).unwrap();
        assert_eq!(drv.outputs["out"], None);
    }

    #[test]
    fn rejects_truncated_input() {
        let truncated = &SIMPLE[..SIMPLE.len() - 10];
        assert!(Derivation::parse(truncated).is_err());
    }
}
