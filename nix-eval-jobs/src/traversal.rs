// SPDX-FileCopyrightText: 2026 The nix-eval-jobs developers
// SPDX-License-Identifier: MIT

//! The traversal scheduler.
//!
//! Keeps the FIFO of attribute paths still to evaluate, hands out tags in
//! submission order, and grows the frontier when a worker reports a
//! recursable node. Tags double as the output order: whatever the workers
//! do, records are emitted by ascending tag, so the emitted sequence equals
//! the enqueue sequence for any pool size.

use std::collections::VecDeque;

use nix_eval_worker::{AttrPath, Request, Selector};

pub struct Scheduler {
    pending: VecDeque<Request>,
    next_tag: u64,
    outstanding: usize,
    quenched: bool,
}

impl Scheduler {
    /// A fresh scheduler, seeded with the root path.
    pub fn new() -> Self {
        let mut scheduler = Self {
            pending: VecDeque::new(),
            next_tag: 0,
            outstanding: 0,
            quenched: false,
        };
        scheduler.push(AttrPath::root());
        scheduler
    }

    fn push(&mut self, path: AttrPath) {
        self.pending.push_back(Request {
            path,
            tag: self.next_tag,
        });
        self.next_tag += 1;
    }

    /// Enqueue the children of a recursable node, in the order the
    /// evaluator reported them.
    pub fn push_children(&mut self, parent: &AttrPath, children: Vec<Selector>) {
        if self.quenched {
            return;
        }
        for child in children {
            self.push(parent.child(child));
        }
    }

    /// Take the next request for dispatch.
    pub fn next_request(&mut self) -> Option<Request> {
        let request = self.pending.pop_front()?;
        self.outstanding += 1;
        Some(request)
    }

    /// Return a dispatched request that never reached its worker. The tag
    /// is already assigned, so it goes to the front: emission order is
    /// unaffected either way, but this keeps the frontier compact.
    pub fn requeue(&mut self, request: Request) {
        self.outstanding -= 1;
        self.pending.push_front(request);
    }

    /// A dispatched request has been answered (or its worker is gone).
    pub fn harvested(&mut self) {
        self.outstanding -= 1;
    }

    /// Stop growing the traversal and drop everything not yet dispatched.
    /// Returns the dropped requests so their tags can be accounted for.
    pub fn quench(&mut self) -> Vec<Request> {
        self.quenched = true;
        self.pending.drain(..).collect()
    }

    /// No work queued and nothing in flight.
    pub fn idle(&self) -> bool {
        self.pending.is_empty() && self.outstanding == 0
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Selector {
        Selector::name(s)
    }

    /// Tags are handed out in discovery order: root first, then children in
    /// the order the evaluator listed them.
    #[test]
    fn tags_follow_enqueue_order() {
        let mut scheduler = Scheduler::new();
        let root = scheduler.next_request().unwrap();
        assert_eq!(root.tag, 0);
        assert!(root.path.is_root());

        scheduler.push_children(&root.path, vec![name("a"), name("b")]);
        let a = scheduler.next_request().unwrap();
        let b = scheduler.next_request().unwrap();
        assert_eq!((a.tag, a.path.render()), (1, "a".to_string()));
        assert_eq!((b.tag, b.path.render()), (2, "b".to_string()));

        // children discovered later get later tags
        scheduler.push_children(&a.path, vec![name("x")]);
        assert_eq!(scheduler.next_request().unwrap().tag, 3);
    }

    #[test]
    fn idle_means_no_pending_and_no_outstanding() {
        let mut scheduler = Scheduler::new();
        assert!(!scheduler.idle());
        let root = scheduler.next_request().unwrap();
        assert!(!scheduler.idle());
        scheduler.harvested();
        assert!(scheduler.idle());
        scheduler.push_children(&root.path, vec![name("a")]);
        assert!(!scheduler.idle(), "new children revive the queue");
    }

    #[test]
    fn quench_drops_pending_and_blocks_growth() {
        let mut scheduler = Scheduler::new();
        let root = scheduler.next_request().unwrap();
        scheduler.push_children(&root.path, vec![name("a"), name("b")]);

        let dropped = scheduler.quench();
        assert_eq!(dropped.len(), 2);
        assert!(!scheduler.has_pending());

        scheduler.push_children(&root.path, vec![name("c")]);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn requeue_preserves_the_tag() {
        let mut scheduler = Scheduler::new();
        let root = scheduler.next_request().unwrap();
        scheduler.requeue(root);
        assert_eq!(scheduler.next_request().unwrap().tag, 0);
    }
}
