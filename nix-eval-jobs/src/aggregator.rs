// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Ordered emission of records.
//!
//! Workers answer in whatever order they finish; the aggregator is a slot
//! table keyed by tag with a cursor that advances over contiguous results,
//! so early slow jobs hold back output but never hold back workers.
//! Aggregate records are the exception: with the constituent resolver
//! enabled they are parked until the whole traversal is done, then emitted
//! in their tag order after resolution.

use std::collections::BTreeMap;
use std::io::Write;

use nix_eval_worker::{DrvRecord, ErrorRecord};

use crate::error::{DriverError, IoContext};

#[derive(Debug)]
pub enum Outcome {
    /// Emit in tag order.
    Drv(DrvRecord),
    /// Park until the resolver has run.
    Aggregate(DrvRecord),
    /// Emit in tag order.
    Error(ErrorRecord),
    /// No record, just advance the cursor (recursions, blocked values,
    /// cancelled tags).
    Nothing,
}

pub struct Aggregator<W> {
    out: W,
    results: BTreeMap<u64, Outcome>,
    withheld: BTreeMap<u64, DrvRecord>,
    next_emit: u64,
}

impl<W: Write> Aggregator<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            results: BTreeMap::new(),
            withheld: BTreeMap::new(),
            next_emit: 0,
        }
    }

    pub fn insert(&mut self, tag: u64, outcome: Outcome) -> Result<(), DriverError> {
        self.results.insert(tag, outcome);
        self.advance()
    }

    fn advance(&mut self) -> Result<(), DriverError> {
        while let Some(outcome) = self.results.remove(&self.next_emit) {
            match outcome {
                Outcome::Nothing => {}
                Outcome::Drv(record) => self.write_line(&record)?,
                Outcome::Error(record) => self.write_line(&record)?,
                Outcome::Aggregate(record) => {
                    self.withheld.insert(self.next_emit, record);
                }
            }
            self.next_emit += 1;
        }
        Ok(())
    }

    fn write_line<T: serde::Serialize>(&mut self, record: &T) -> Result<(), DriverError> {
        let line = serde_json::to_string(record)?;
        writeln!(self.out, "{line}")
            .and_then(|()| self.out.flush())
            .io_context(|| "failed to write record".to_string())
    }

    /// The parked aggregates, for the resolver to rewrite in place.
    pub fn withheld_mut(&mut self) -> &mut BTreeMap<u64, DrvRecord> {
        &mut self.withheld
    }

    /// Emit the parked aggregates in ascending tag order.
    pub fn flush_withheld(&mut self) -> Result<(), DriverError> {
        for (_, record) in std::mem::take(&mut self.withheld) {
            self.write_line(&record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix_eval_worker::{AttrPath, Selector};

    fn record(attr: &str) -> DrvRecord {
        DrvRecord::new(
            &AttrPath::new(vec![Selector::name(attr)]),
            attr,
            format!("/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-{attr}.drv"),
        )
    }

    fn attrs(output: &[u8]) -> Vec<String> {
        String::from_utf8(output.to_vec())
            .unwrap()
            .lines()
            .map(|l| {
                serde_json::from_str::<serde_json::Value>(l).unwrap()["attr"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    /// Results landing out of order are still emitted by ascending tag.
    #[test]
    fn emits_in_tag_order() {
        let mut aggregator = Aggregator::new(Vec::new());
        aggregator.insert(2, Outcome::Drv(record("c"))).unwrap();
        aggregator.insert(0, Outcome::Drv(record("a"))).unwrap();
        assert_eq!(attrs(&aggregator.out), vec!["a"], "tag 1 still missing");

        aggregator.insert(1, Outcome::Drv(record("b"))).unwrap();
        assert_eq!(attrs(&aggregator.out), vec!["a", "b", "c"]);
    }

    /// `Nothing` slots advance the cursor without producing a line.
    #[test]
    fn nothing_slots_are_skipped() {
        let mut aggregator = Aggregator::new(Vec::new());
        aggregator.insert(1, Outcome::Drv(record("b"))).unwrap();
        aggregator.insert(0, Outcome::Nothing).unwrap();
        assert_eq!(attrs(&aggregator.out), vec!["b"]);
    }

    /// Aggregates are parked past later non-aggregate tags, then flushed in
    /// tag order.
    #[test]
    fn aggregates_are_withheld_until_flush() {
        let mut aggregator = Aggregator::new(Vec::new());
        aggregator
            .insert(0, Outcome::Aggregate(record("agg")))
            .unwrap();
        aggregator.insert(1, Outcome::Drv(record("b"))).unwrap();
        assert_eq!(attrs(&aggregator.out), vec!["b"], "aggregate must not block");

        aggregator.flush_withheld().unwrap();
        assert_eq!(attrs(&aggregator.out), vec!["b", "agg"]);
    }
}
