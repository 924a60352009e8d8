use aimon_common::LabelSet;
use std::collections::HashSet;

use super::matcher::{all_match, Matcher};

/// Per-route notification timing in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTiming {
    pub group_wait_ms: i64,
    pub group_interval_ms: i64,
    pub repeat_interval_ms: i64,
}

impl Default for RouteTiming {
    fn default() -> Self {
        Self {
            group_wait_ms: 30_000,
            group_interval_ms: 5 * 60_000,
            repeat_interval_ms: 4 * 60 * 60_000,
        }
    }
}

/// A routing tree node with inheritance already applied: every node carries
/// its effective receiver, grouping and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Position in the tree ("0", "0.1", "0.1.0", ...). Part of every group key.
    pub id: String,
    pub receiver: String,
    pub matchers: Vec<Matcher>,
    pub group_by: Vec<String>,
    pub timing: RouteTiming,
    pub continue_matching: bool,
    pub children: Vec<Route>,
}

impl Route {
    pub fn new(receiver: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            receiver: receiver.into(),
            matchers: Vec::new(),
            group_by: Vec::new(),
            timing: RouteTiming::default(),
            continue_matching: false,
            children: Vec::new(),
        }
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn with_group_by(mut self, labels: &[&str]) -> Self {
        self.group_by = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_timing(mut self, timing: RouteTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_continue(mut self, on: bool) -> Self {
        self.continue_matching = on;
        self
    }

    pub fn with_child(mut self, child: Route) -> Self {
        self.children.push(child);
        self
    }

    fn assign_ids(&mut self, id: String) {
        for (i, child) in self.children.iter_mut().enumerate() {
            child.assign_ids(format!("{id}.{i}"));
        }
        self.id = id;
    }

    fn collect<'a>(&'a self, labels: &LabelSet, out: &mut Vec<&'a Route>) -> bool {
        if !all_match(&self.matchers, labels) {
            return false;
        }
        let mut any_child = false;
        for child in &self.children {
            if child.collect(labels, out) {
                any_child = true;
                if !child.continue_matching {
                    break;
                }
            }
        }
        if !any_child {
            out.push(self);
        }
        true
    }

    fn find<'a>(&'a self, id: &str) -> Option<&'a Route> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTree {
    root: Route,
}

impl RoutingTree {
    /// Takes ownership of the root; its own matchers are ignored so the root
    /// always matches.
    pub fn new(mut root: Route) -> Self {
        root.matchers.clear();
        root.assign_ids("0".to_string());
        Self { root }
    }

    pub fn root(&self) -> &Route {
        &self.root
    }

    /// Routes selected for `labels`, in tree order. A receiver reached through
    /// several `continue` branches is kept only at its first route.
    pub fn resolve(&self, labels: &LabelSet) -> Vec<&Route> {
        let mut out = Vec::new();
        self.root.collect(labels, &mut out);
        let mut seen = HashSet::new();
        out.retain(|r| seen.insert(r.receiver.clone()));
        out
    }

    pub fn route(&self, id: &str) -> Option<&Route> {
        self.root.find(id)
    }

    /// Every receiver name referenced by the tree.
    pub fn receivers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(r) = stack.pop() {
            if !out.contains(&r.receiver.as_str()) {
                out.push(r.receiver.as_str());
            }
            stack.extend(r.children.iter());
        }
        out
    }
}
