// SPDX-License-Identifier: BSD-3-Clause
//! Intraprocedural dataflow fixpoint
//!
//! A [`DataflowVisitor`] supplies the transfer function for one instruction;
//! [`comp_forward_dataflow`] and [`comp_backward_dataflow`] iterate it over
//! the instructions of one function until no state changes. States live in a
//! [`DataflowResult`] keyed by instruction, so a visitor handling one function
//! may also read and update the states of other functions (e.g., the exit
//! state of a call site in a caller).

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::ir::{FunctionId, InstId, Module};
use crate::lattice::JoinSemiLattice;

/// `(IN, OUT)` for every instruction visited so far
#[derive(Clone, Debug)]
pub struct DataflowResult<I> {
    states: FxHashMap<InstId, (I, I)>,
}

impl<I> Default for DataflowResult<I> {
    fn default() -> Self {
        DataflowResult {
            states: FxHashMap::default(),
        }
    }
}

impl<I: JoinSemiLattice> DataflowResult<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `(IN, OUT)` pair of `i`, created empty on first access.
    pub fn entry(&mut self, i: InstId) -> &mut (I, I) {
        self.states.entry(i).or_default()
    }

    pub fn input(&self, i: InstId) -> Option<&I> {
        self.states.get(&i).map(|s| &s.0)
    }

    pub fn output(&self, i: InstId) -> Option<&I> {
        self.states.get(&i).map(|s| &s.1)
    }

    /// States in instruction order
    pub fn iter(&self) -> impl Iterator<Item = (InstId, &(I, I))> {
        let mut keys: Vec<_> = self.states.keys().copied().collect();
        keys.sort_unstable();
        keys.into_iter().filter_map(|k| self.states.get(&k).map(|s| (k, s)))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

pub trait DataflowVisitor {
    type Info: JoinSemiLattice;

    /// Transfer function for `inst`.
    ///
    /// In a forward analysis, read `result.entry(inst).0` and write `.1`; in a
    /// backward analysis, the other way around.
    fn comp_df_val(
        &mut self,
        module: &Module,
        inst: InstId,
        result: &mut DataflowResult<Self::Info>,
    );
}

/// Iterate `visitor` over `f` in reverse postorder until no OUT state
/// changes. The IN state of the entry block is joined with `entry`. Returns
/// the number of passes.
pub fn comp_forward_dataflow<V: DataflowVisitor>(
    module: &Module,
    f: FunctionId,
    visitor: &mut V,
    result: &mut DataflowResult<V::Info>,
    entry: &V::Info,
) -> usize {
    let func = module.function(f);
    let order = func.reverse_postorder();
    let mut passes = 0;
    loop {
        passes += 1;
        let mut changed = false;
        for b in &order {
            let block = func.block(*b);
            let mut input = if b.index() == 0 {
                entry.clone()
            } else {
                V::Info::default()
            };
            for p in block.predecessors() {
                if let Some(out) = func.block(*p).last().and_then(|l| result.output(l)) {
                    input.join(out);
                }
            }
            for i in block.instructions() {
                let slot = result.entry(*i);
                slot.0 = input;
                let before = slot.1.clone();
                visitor.comp_df_val(module, *i, result);
                let slot = result.entry(*i);
                if slot.1 != before {
                    changed = true;
                }
                input = slot.1.clone();
            }
        }
        trace!(function = func.name(), passes, changed, "forward pass");
        if !changed {
            return passes;
        }
    }
}

/// Iterate `visitor` over `f` in postorder, instructions last to first, until
/// no IN state changes. The OUT state of every exit block is joined with
/// `exit`. Returns the number of passes.
pub fn comp_backward_dataflow<V: DataflowVisitor>(
    module: &Module,
    f: FunctionId,
    visitor: &mut V,
    result: &mut DataflowResult<V::Info>,
    exit: &V::Info,
) -> usize {
    let func = module.function(f);
    let order = func.postorder();
    let mut passes = 0;
    loop {
        passes += 1;
        let mut changed = false;
        for b in &order {
            let block = func.block(*b);
            let mut output = if block.successors().is_empty() {
                exit.clone()
            } else {
                V::Info::default()
            };
            for s in block.successors() {
                if let Some(inp) = func.block(*s).first().and_then(|l| result.input(l)) {
                    output.join(inp);
                }
            }
            for i in block.instructions().iter().rev() {
                let slot = result.entry(*i);
                slot.1 = output;
                let before = slot.0.clone();
                visitor.comp_df_val(module, *i, result);
                let slot = result.entry(*i);
                if slot.0 != before {
                    changed = true;
                }
                output = slot.0.clone();
            }
        }
        trace!(function = func.name(), passes, changed, "backward pass");
        if !changed {
            return passes;
        }
    }
}

impl<T: Clone + Ord> JoinSemiLattice for BTreeSet<T> {
    fn join(&mut self, other: &Self) -> bool {
        let before = self.len();
        self.extend(other.iter().cloned());
        self.len() != before
    }
}
