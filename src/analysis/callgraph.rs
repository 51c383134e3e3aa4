// SPDX-License-Identifier: BSD-3-Clause
//! Callgraph accumulated during the points-to fixpoint
//!
//! Each call site maps to the functions it may invoke. Sets only grow, so a
//! site's entry after convergence is its final answer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{FunctionId, InstId, Module, ValueId};
use crate::lattice::PointsToInfo;

/// Functions `callee` may denote in `state`.
///
/// A function value denotes itself. Anything else denotes the functions
/// reachable by repeatedly following direct points-to facts, starting from
/// those of `callee`.
pub fn resolve_callees(
    module: &Module,
    callee: ValueId,
    state: &PointsToInfo,
) -> BTreeSet<FunctionId> {
    let mut result = BTreeSet::new();
    if let Some(f) = module.as_function(callee) {
        result.insert(f);
        return result;
    }
    let mut seen: FxHashSet<ValueId> = FxHashSet::default();
    let mut frontier: Vec<ValueId> = match state.points_to(callee) {
        Some(s) => s.iter().copied().collect(),
        None => return result,
    };
    seen.insert(callee);
    while let Some(v) = frontier.pop() {
        if !seen.insert(v) {
            continue;
        }
        match module.as_function(v) {
            Some(f) => {
                result.insert(f);
            }
            None => {
                if let Some(s) = state.points_to(v) {
                    frontier.extend(s.iter().copied().filter(|w| !seen.contains(w)));
                }
            }
        }
    }
    result
}

#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    sites: BTreeMap<InstId, BTreeSet<FunctionId>>,
    callers: FxHashMap<FunctionId, BTreeSet<InstId>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call site with no known callees yet.
    pub fn add_site(&mut self, site: InstId) {
        self.sites.entry(site).or_default();
    }

    /// Add callees to `site`, returning those that weren't already known.
    pub fn record(
        &mut self,
        site: InstId,
        callees: impl IntoIterator<Item = FunctionId>,
    ) -> Vec<FunctionId> {
        let known = self.sites.entry(site).or_default();
        let mut new = Vec::new();
        for f in callees {
            if known.insert(f) {
                self.callers.entry(f).or_default().insert(site);
                new.push(f);
            }
        }
        new
    }

    pub fn callees(&self, site: InstId) -> Option<&BTreeSet<FunctionId>> {
        self.sites.get(&site)
    }

    /// Call sites that may invoke `f`
    pub fn callers_of(&self, f: FunctionId) -> impl Iterator<Item = InstId> + '_ {
        self.callers.get(&f).into_iter().flatten().copied()
    }

    pub fn sites(&self) -> impl Iterator<Item = (InstId, &BTreeSet<FunctionId>)> {
        self.sites.iter().map(|(i, fs)| (*i, fs))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Number of (site, callee) pairs
    pub fn edges(&self) -> usize {
        self.sites.values().map(BTreeSet::len).sum()
    }

    /// Sites by ascending source line; sites without a line come last.
    pub fn sorted_by_line<'a>(
        &'a self,
        module: &Module,
    ) -> Vec<(InstId, &'a BTreeSet<FunctionId>)> {
        let mut sites: Vec<_> = self.sites().collect();
        sites.sort_by_key(|(i, _)| {
            let line = module.instruction(*i).line();
            (line.is_none(), line, *i)
        });
        sites
    }

    pub fn report(&self, module: &Module) -> Vec<CallReport> {
        self.sorted_by_line(module)
            .into_iter()
            .map(|(i, fs)| {
                let inst = module.instruction(i);
                let mut callees: Vec<String> = fs
                    .iter()
                    .map(|f| module.function(*f).name().to_string())
                    .collect();
                callees.sort();
                CallReport {
                    line: inst.line(),
                    caller: module.function(inst.function()).name().to_string(),
                    site: module.value(inst.value()).name().to_string(),
                    callees,
                }
            })
            .collect()
    }
}

/// One line of output: a call site and its possible callees
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct CallReport {
    pub line: Option<u32>,
    pub caller: String,
    pub site: String,
    pub callees: Vec<String>,
}

impl fmt::Display for CallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(l) => write!(f, "{} : {}", l, self.callees.join(", ")),
            None => write!(f, "{} : {}", self.site, self.callees.join(", ")),
        }
    }
}
