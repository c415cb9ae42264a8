// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Job results and the wire protocol between driver and workers.
//!
//! Every value a worker inspects collapses into one of five outcomes: a
//! derivation record, a set of children to recurse into, an evaluation
//! error, a refusal (functions and other opaque values), or nothing worth
//! reporting. All downstream logic dispatches on this sum; there is no
//! duck-typing of half-classified values anywhere else.
//!
//! The same types double as the line protocol: requests and responses are
//! single-line JSON with a `tag` correlating them, and the derivation record
//! is already in its final output shape so the driver can emit it verbatim.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::attr_path::{AttrPath, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStatus {
    Cached,
    NotBuilt,
    Unknown,
}

/// One emitted derivation record. Field order is the output key order;
/// absent keys are meaningful (e.g. cache fields only exist when cache
/// checking ran), hence the pervasive `skip_serializing_if`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrvRecord {
    pub attr: String,
    pub attr_path: AttrPath,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub drv_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_drvs: Option<BTreeMap<String, BTreeSet<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<CacheStatus>,
    /// Legacy mirror of `cache_status == Cached`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_cached: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needed_builds: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needed_substitutes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constituents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_constituents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob_constituents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DrvRecord {
    pub fn new(path: &AttrPath, name: impl Into<String>, drv_path: impl Into<String>) -> Self {
        Self {
            attr: path.render(),
            attr_path: path.clone(),
            name: name.into(),
            system: None,
            drv_path: drv_path.into(),
            outputs: BTreeMap::new(),
            meta: None,
            input_drvs: None,
            cache_status: None,
            is_cached: None,
            needed_builds: None,
            needed_substitutes: None,
            constituents: None,
            named_constituents: None,
            glob_constituents: None,
            extra_value: None,
            error: None,
        }
    }

    /// An aggregate names or globs other jobs as its contents.
    pub fn is_aggregate(&self) -> bool {
        self.named_constituents.as_ref().is_some_and(|c| !c.is_empty())
            || self.glob_constituents.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub fn push_error(&mut self, message: &str) {
        match &mut self.error {
            Some(error) => error.push_str(message),
            None => self.error = Some(message.to_string()),
        }
    }
}

/// An evaluation failure scoped to one attribute path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub attr: String,
    pub attr_path: AttrPath,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_name: Option<String>,
}

/// The five job outcomes, which double as the worker's reply wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Reply {
    /// A derivation (possibly an aggregate) was materialized.
    Drv {
        #[serde(flatten)]
        record: Box<DrvRecord>,
    },
    /// The node wants its children enqueued.
    Attrs { children: Vec<Selector> },
    /// Evaluation of this attribute failed.
    #[serde(rename_all = "camelCase")]
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attr_name: Option<String>,
    },
    /// The worker refuses to classify the value (function, opaque).
    Blocked,
    /// Not a candidate; yields no record.
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub path: AttrPath,
    pub tag: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub tag: u64,
    #[serde(flatten)]
    pub reply: Reply,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Absent optional keys must not serialize at all; their absence is
    /// part of the output contract.
    #[test]
    fn absent_keys_are_omitted() {
        let record = DrvRecord::new(
            &AttrPath::new(vec![Selector::name("builtJob")]),
            "job1",
            "/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-job1.drv",
        );
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"attr":"builtJob","attrPath":["builtJob"],"name":"job1","drvPath":"/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-job1.drv"}"#
        );
    }

    #[test]
    fn response_roundtrips_through_the_wire() {
        let mut record = DrvRecord::new(
            &AttrPath::new(vec![Selector::name("x")]),
            "job",
            "/nix/store/bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb-job.drv",
        );
        record.cache_status = Some(CacheStatus::NotBuilt);
        record.is_cached = Some(false);

        let response = Response {
            tag: 7,
            reply: Reply::Drv {
                record: Box::new(record),
            },
        };
        let line = serde_json::to_string(&response).unwrap();
        assert!(line.contains(r#""tag":7"#));
        assert!(line.contains(r#""event":"drv""#));
        assert!(line.contains(r#""cacheStatus":"NotBuilt""#));

        let back: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn error_reply_carries_attr_name() {
        let response = Response {
            tag: 3,
            reply: Reply::Error {
                error: "recurse.bad: does not exist".into(),
                attr_name: Some("bad".into()),
            },
        };
        let line = serde_json::to_string(&response).unwrap();
        let back: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(back, response);
    }
}
