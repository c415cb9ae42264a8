// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! The constituent resolver.
//!
//! After the traversal drains, aggregate records still reference other jobs
//! symbolically: by rendered attribute path, or by glob patterns over those
//! paths. This pass expands globs, resolves names, detects reference cycles
//! between aggregates with Tarjan's SCC, and rewrites each aggregate's
//! `constituents` to concrete derivation paths in first-seen order.
//!
//! Aggregates are identified by rendered attribute path throughout; the
//! reference graph is an adjacency list over dense node indices, never
//! owning handles into the records themselves.

use std::collections::{BTreeMap, HashMap, HashSet};

use nix_eval_worker::{DrvRecord, glob_matches};

/// Everything the resolver knows about the jobs seen during the run, keyed
/// by rendered attribute path.
#[derive(Default)]
pub struct JobIndex {
    jobs: Vec<JobEntry>,
    by_attr: HashMap<String, usize>,
}

pub struct JobEntry {
    pub attr: String,
    pub tag: u64,
    pub drv_path: String,
    pub is_aggregate: bool,
}

impl JobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: &DrvRecord, tag: u64) {
        self.by_attr.insert(record.attr.clone(), self.jobs.len());
        self.jobs.push(JobEntry {
            attr: record.attr.clone(),
            tag,
            drv_path: record.drv_path.clone(),
            is_aggregate: record.is_aggregate(),
        });
    }

    pub fn get(&self, attr: &str) -> Option<&JobEntry> {
        self.by_attr.get(attr).map(|&i| &self.jobs[i])
    }

    /// All jobs in submission order, the deterministic order for glob
    /// expansion.
    fn by_tag(&self) -> Vec<&JobEntry> {
        let mut jobs: Vec<&JobEntry> = self.jobs.iter().collect();
        jobs.sort_by_key(|j| j.tag);
        jobs
    }
}

/// One resolved reference out of an aggregate, in record order.
enum Ref {
    Drv(String),
    Aggregate(usize),
}

/// Resolve all withheld aggregates in place.
pub fn resolve_constituents(aggregates: &mut BTreeMap<u64, DrvRecord>, index: &JobIndex) {
    let tags: Vec<u64> = aggregates.keys().copied().collect();
    let node_count = tags.len();
    let node_of_attr: HashMap<&str, usize> = tags
        .iter()
        .enumerate()
        .map(|(i, tag)| (aggregates[tag].attr.as_str(), i))
        .collect();
    let jobs_by_tag = index.by_tag();

    // Step 1+2: expand globs and resolve names into ordered references,
    // collecting per-aggregate errors.
    let mut refs: Vec<Vec<Ref>> = Vec::with_capacity(node_count);
    let mut errors: Vec<String> = vec![String::new(); node_count];

    for (i, tag) in tags.iter().enumerate() {
        let record = &aggregates[tag];
        let mut node_refs = Vec::new();

        for pattern in record.glob_constituents.iter().flatten() {
            let mut matched = false;
            for job in &jobs_by_tag {
                // An aggregate's glob never captures the aggregate itself.
                if job.tag == *tag || !glob_matches(pattern, &job.attr) {
                    continue;
                }
                matched = true;
                match node_of_attr.get(job.attr.as_str()) {
                    Some(&target) if job.is_aggregate => node_refs.push(Ref::Aggregate(target)),
                    _ => node_refs.push(Ref::Drv(job.drv_path.clone())),
                }
            }
            if !matched {
                errors[i].push_str(&format!(
                    "{pattern}: constituent glob pattern had no matches\n"
                ));
            }
        }

        for name in record.named_constituents.iter().flatten() {
            match index.get(name) {
                Some(job) => match node_of_attr.get(job.attr.as_str()) {
                    Some(&target) if job.is_aggregate => node_refs.push(Ref::Aggregate(target)),
                    _ => node_refs.push(Ref::Drv(job.drv_path.clone())),
                },
                None => errors[i].push_str(&format!("{name}: does not exist\n")),
            }
        }

        refs.push(node_refs);
    }

    // Step 3: cycles. Tarjan emits each component only after all components
    // it references, so the same pass doubles as the reverse-topological
    // flatten order.
    let adj: Vec<Vec<usize>> = refs
        .iter()
        .map(|rs| {
            rs.iter()
                .filter_map(|r| match r {
                    Ref::Aggregate(t) => Some(*t),
                    Ref::Drv(_) => None,
                })
                .collect()
        })
        .collect();

    let mut in_cycle = vec![false; node_count];
    let mut resolved: Vec<Vec<String>> = vec![Vec::new(); node_count];

    for mut component in tarjan_sccs(&adj) {
        let cyclic =
            component.len() > 1 || adj[component[0]].contains(&component[0]);
        if cyclic {
            component.sort_unstable();
            let participants: Vec<&str> = component
                .iter()
                .map(|&m| aggregates[&tags[m]].attr.as_str())
                .collect();
            let message = format!("Dependency cycle: {}", participants.join(" <-> "));
            for &member in &component {
                in_cycle[member] = true;
                errors[member] = message.clone();
            }
            continue;
        }

        // Step 4: flatten, first-seen wins.
        fn push(constituents: &mut Vec<String>, seen: &mut HashSet<String>, path: &str) {
            if seen.insert(path.to_string()) {
                constituents.push(path.to_string());
            }
        }

        let node = component[0];
        let mut seen = HashSet::new();
        let mut constituents = Vec::new();
        for direct in aggregates[&tags[node]].constituents.iter().flatten() {
            push(&mut constituents, &mut seen, direct);
        }
        for reference in &refs[node] {
            match reference {
                Ref::Drv(path) => push(&mut constituents, &mut seen, path),
                Ref::Aggregate(target) if !in_cycle[*target] => {
                    for path in &resolved[*target] {
                        push(&mut constituents, &mut seen, path);
                    }
                }
                Ref::Aggregate(_) => {}
            }
        }
        resolved[node] = constituents;
    }

    // Step 5: rewrite.
    for (i, tag) in tags.iter().enumerate() {
        let record = aggregates.get_mut(tag).expect("withheld tag vanished");
        record.named_constituents = None;
        record.glob_constituents = None;
        if in_cycle[i] {
            // Replaced with the cycle error; constituents stay unrewritten.
            record.error = Some(errors[i].clone());
        } else {
            record.constituents = Some(std::mem::take(&mut resolved[i]));
            if !errors[i].is_empty() {
                record.push_error(&errors[i]);
            }
        }
    }
}

/// Iterative Tarjan. Components come out in reverse topological order of
/// the condensation: every component after all components it points to.
fn tarjan_sccs(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adj.len();
    const UNVISITED: usize = usize::MAX;
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components = Vec::new();

    for start in 0..n {
        if index[start] != UNVISITED {
            continue;
        }
        let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(&(v, cursor)) = frames.last() {
            if cursor == 0 {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if let Some(&w) = adj[v].get(cursor) {
                frames.last_mut().expect("frame just read").1 += 1;
                if index[w] == UNVISITED {
                    frames.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    components.push(component);
                }
            }
        }
    }
    components
}
