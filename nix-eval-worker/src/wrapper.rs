// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! Value classification and record extraction.
//!
//! [`Walker`] is the layer between the raw evaluator and the job protocol:
//! it navigates to an attribute path, forces the value just enough to decide
//! what it is, and materializes derivation leaves into records. All
//! discrimination of the dynamically-typed language happens here; everything
//! downstream consumes the [`Reply`] sum.

use nix_eval_store::{
    BinaryCache, Derivation, GcRootsDir, Store, StorePath, Substituter, query_missing,
};

use crate::attr_path::{AttrPath, Selector};
use crate::config::{EvalOptions, WorkerConfig};
use crate::eval::{Eval, EvalError, EvalResult, Forced, Value};
use crate::record::{CacheStatus, DrvRecord, Reply};

pub struct Walker<E: Eval> {
    eval: E,
    opts: EvalOptions,
    store: Store,
    substituters: Vec<Box<dyn Substituter>>,
    roots: Option<GcRootsDir>,
    root: Value,
}

impl<E: Eval> Walker<E> {
    pub fn new(mut eval: E, config: &WorkerConfig) -> EvalResult<Self> {
        let mut root = eval.load_root(&config.source)?;
        if let Some(select) = &config.opts.select {
            root = eval.apply_expr(select, root)?;
            // Surface a broken selector now rather than on every job.
            eval.force(root).map_err(|e| EvalError::fatal(e.message))?;
        }

        let mut store = match &config.opts.store_dir {
            Some(dir) => Store::new(dir),
            None => Store::from_env(),
        };
        if let Some(real) = &config.opts.real_store_dir {
            store = store.with_real_dir(real);
        }

        let roots = match &config.opts.gc_roots_dir {
            Some(dir) => Some(GcRootsDir::new(dir).map_err(|e| EvalError::fatal(e.to_string()))?),
            None => None,
        };

        let mut substituters: Vec<Box<dyn Substituter>> = Vec::new();
        if config.opts.check_cache_status {
            for url in &config.opts.substituters {
                match BinaryCache::new(url) {
                    Ok(cache) => substituters.push(Box::new(cache)),
                    Err(e) => log::warn!("ignoring substituter {url}: {e}"),
                }
            }
        }

        Ok(Self {
            eval,
            opts: config.opts.clone(),
            store,
            substituters,
            roots,
            root,
        })
    }

    pub fn with_store(mut self, store: Store) -> Self {
        self.store = store;
        self
    }

    pub fn with_substituters(mut self, substituters: Vec<Box<dyn Substituter>>) -> Self {
        self.substituters = substituters;
        self
    }

    /// Evaluate one attribute path to a reply.
    ///
    /// Recoverable evaluation failures come back as [`Reply::Error`]; an
    /// `Err` from here means the worker must shut down.
    pub fn probe(&mut self, path: &AttrPath) -> EvalResult<Reply> {
        match self.probe_inner(path) {
            Err(e) if !e.is_fatal() => Ok(Reply::Error {
                error: e.message,
                attr_name: path.last_name().map(String::from),
            }),
            other => other,
        }
    }

    fn probe_inner(&mut self, path: &AttrPath) -> EvalResult<Reply> {
        let mut v = self.root;
        for selector in path.selectors() {
            let next = match selector {
                Selector::Name(name) => self.eval.select(v, name)?,
                Selector::Index(i) => self.eval.index(v, *i as usize)?,
            };
            match next {
                Some(next) => v = next,
                None => {
                    return Ok(Reply::Error {
                        error: format!("{}: does not exist", path.render()),
                        attr_name: None,
                    });
                }
            }
        }
        self.classify(v, path)
    }

    fn classify(&mut self, v: Value, path: &AttrPath) -> EvalResult<Reply> {
        match self.eval.force(v)? {
            Forced::Attrs { names } => {
                // A derivation is terminal even when it is also marked for
                // recursion; we never descend into derivation bodies.
                if self.attr_string(v, "type")?.as_deref() == Some("derivation") {
                    self.extract(v, path)
                } else if path.is_root()
                    || self.opts.force_recurse
                    || self.attr_bool(v, "recurseForDerivations")?.unwrap_or(false)
                {
                    Ok(Reply::Attrs {
                        children: names.into_iter().map(Selector::Name).collect(),
                    })
                } else {
                    Ok(Reply::Nothing)
                }
            }
            Forced::List { len } => Ok(Reply::Attrs {
                children: (0..len as u64).map(Selector::Index).collect(),
            }),
            Forced::Function => Ok(Reply::Blocked),
            _ => Ok(Reply::Nothing),
        }
    }

    fn extract(&mut self, v: Value, path: &AttrPath) -> EvalResult<Reply> {
        let name = self
            .attr_string(v, "name")?
            .ok_or_else(|| EvalError::new("derivation is missing a 'name' attribute"))?;
        let drv_path = self.drv_path(v)?;

        let mut record = DrvRecord::new(path, name, &drv_path);
        record.system = self.attr_string(v, "system")?;
        self.extract_outputs(v, &mut record)?;

        if self.opts.meta
            && let Some(meta) = self.eval.select(v, "meta")?
        {
            match self.eval.to_json(meta) {
                Ok(json) => record.meta = Some(json),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::debug!("{}: unevaluable meta: {e}", record.attr),
            }
        }

        self.extract_constituents(v, &mut record)?;

        if let Some(apply) = self.opts.apply.clone() {
            let applied = self.eval.apply_expr(&apply, v)?;
            record.extra_value = Some(self.eval.to_json(applied)?);
        }

        let store_path = StorePath::parse(&drv_path).map_err(|e| EvalError::new(e.to_string()))?;
        if let Some(roots) = &self.roots {
            // A conflicting root means colliding drv base names, i.e. store
            // corruption; nothing sensible can continue after that.
            roots
                .register(&store_path)
                .map_err(|e| EvalError::fatal(e.to_string()))?;
        }

        if !self.opts.no_instantiate {
            if self.opts.show_input_drvs {
                match Derivation::read(&self.store.to_real_path(&store_path)) {
                    Ok(drv) => {
                        record.input_drvs = Some(
                            drv.input_drvs
                                .into_iter()
                                .map(|(path, outputs)| (path.as_str().to_string(), outputs))
                                .collect(),
                        );
                    }
                    Err(e) => log::warn!("{}: cannot read inputs: {e}", record.attr),
                }
            }

            if self.opts.check_cache_status {
                let missing = query_missing(&self.store, &self.substituters, &store_path);
                record.cache_status = Some(if missing.is_cached() {
                    CacheStatus::Cached
                } else if missing.is_substitutable() {
                    CacheStatus::NotBuilt
                } else {
                    CacheStatus::Unknown
                });
                record.is_cached = Some(record.cache_status == Some(CacheStatus::Cached));
                record.needed_builds = Some(
                    missing
                        .will_build
                        .iter()
                        .chain(&missing.unknown)
                        .map(|p| p.as_str().to_string())
                        .collect(),
                );
                record.needed_substitutes = Some(
                    missing
                        .will_substitute
                        .iter()
                        .map(|p| p.as_str().to_string())
                        .collect(),
                );
            }
        }

        Ok(Reply::Drv {
            record: Box::new(record),
        })
    }

    fn drv_path(&mut self, v: Value) -> EvalResult<String> {
        if self.opts.no_instantiate {
            self.eval.hash_derivation(v)
        } else {
            self.eval.instantiate(v)
        }
    }

    fn extract_outputs(&mut self, v: Value, record: &mut DrvRecord) -> EvalResult<()> {
        // `outputs` is a list of names; each name is also an attribute of
        // the derivation holding that output's `outPath`. A thunk-only
        // placeholder has no `outputs` attribute at all and legitimately
        // produces an empty map.
        let Some(outputs) = self.eval.select(v, "outputs")? else {
            return Ok(());
        };
        let Forced::List { len } = self.eval.force(outputs)? else {
            return Ok(());
        };
        for i in 0..len {
            let name_v = self
                .eval
                .index(outputs, i)?
                .ok_or_else(|| EvalError::new("outputs list changed length during forcing"))?;
            let Forced::String(out_name) = self.eval.force(name_v)? else {
                return Err(EvalError::new("output name is not a string"));
            };
            if let Some(out_attrs) = self.eval.select(v, &out_name)?
                && let Some(out_path) = self.attr_string(out_attrs, "outPath")?
            {
                record.outputs.insert(out_name, out_path);
            }
        }
        Ok(())
    }

    fn extract_constituents(&mut self, v: Value, record: &mut DrvRecord) -> EvalResult<()> {
        let glob_mode = self.attr_bool(v, "_hydraGlobConstituents")?.unwrap_or(false);
        let mut concrete: Vec<String> = Vec::new();
        let mut named: Vec<String> = Vec::new();
        let mut globs: Vec<String> = Vec::new();

        if let Some(list) = self.eval.select(v, "constituents")?
            && let Forced::List { len } = self.eval.force(list)?
        {
            for i in 0..len {
                let elem = self
                    .eval
                    .index(list, i)?
                    .ok_or_else(|| EvalError::new("constituents list changed length"))?;
                match self.eval.force(elem)? {
                    Forced::String(s) if glob_mode => globs.push(s),
                    Forced::String(s) => named.push(s),
                    Forced::Attrs { .. } => {
                        let drv_path = self.drv_path(elem)?;
                        if !concrete.contains(&drv_path) {
                            concrete.push(drv_path);
                        }
                    }
                    other => {
                        return Err(EvalError::new(format!(
                            "constituent {i} is neither a derivation nor a string ({other:?})"
                        )));
                    }
                }
            }
        }

        if let Some(list) = self.eval.select(v, "namedConstituents")?
            && let Forced::List { len } = self.eval.force(list)?
        {
            for i in 0..len {
                let elem = self
                    .eval
                    .index(list, i)?
                    .ok_or_else(|| EvalError::new("namedConstituents list changed length"))?;
                match self.eval.force(elem)? {
                    Forced::String(s) => named.push(s),
                    other => {
                        return Err(EvalError::new(format!(
                            "named constituent {i} is not a string ({other:?})"
                        )));
                    }
                }
            }
        }

        if !concrete.is_empty() {
            record.constituents = Some(concrete);
        }
        if !named.is_empty() {
            record.named_constituents = Some(named);
        }
        if !globs.is_empty() {
            record.glob_constituents = Some(globs);
        }
        Ok(())
    }

    fn attr_string(&mut self, v: Value, name: &str) -> EvalResult<Option<String>> {
        match self.eval.select(v, name)? {
            Some(attr) => match self.eval.force(attr)? {
                Forced::String(s) => Ok(Some(s)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn attr_bool(&mut self, v: Value, name: &str) -> EvalResult<Option<bool>> {
        match self.eval.select(v, name)? {
            Some(attr) => match self.eval.force(attr)? {
                Forced::Bool(b) => Ok(Some(b)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }
}
