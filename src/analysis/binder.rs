// SPDX-License-Identifier: BSD-3-Clause
//! Moving points-to facts across call and return edges
//!
//! A [`Binding`] pairs the pointer-typed arguments of one call site with the
//! parameters of one callee. Binding renames caller arguments to callee
//! parameters wherever they occur in a state (as keys and as members);
//! unbinding renames them back.

use rustc_hash::FxHashMap;

use crate::ir::{instruction::Call, FunctionId, Module, ValueId};
use crate::lattice::{PointsToInfo, PointsToMap, ValueSet};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Binding {
    /// `(argument, parameter)`, in parameter order
    pairs: Vec<(ValueId, ValueId)>,
}

impl Binding {
    /// Bind the overlapping prefix of `call`'s arguments and `callee`'s
    /// parameters. Arguments that aren't pointers are skipped.
    pub fn new(module: &Module, call: &Call, callee: FunctionId) -> Self {
        let params = module.function(callee).parameters();
        let pairs = call
            .args
            .iter()
            .zip(params)
            .filter(|(arg, _)| module.value(**arg).is_pointer())
            .map(|(arg, param)| (*arg, *param))
            .collect();
        Binding { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(ValueId, ValueId)] {
        &self.pairs
    }

    /// Is `v` one of the bound parameters?
    pub fn binds_parameter(&self, v: ValueId) -> bool {
        self.pairs.iter().any(|(_, p)| *p == v)
    }

    /// Caller state at the call, as seen from the callee's entry. Function
    /// arguments are also recorded as facts of their parameters.
    pub fn bind(&self, module: &Module, state: &PointsToInfo) -> PointsToInfo {
        let mut renaming: FxHashMap<ValueId, Vec<ValueId>> = FxHashMap::default();
        for (arg, param) in &self.pairs {
            renaming.entry(*arg).or_default().push(*param);
        }
        let mut bound = substitute(state, &renaming);
        for (arg, param) in &self.pairs {
            if module.as_function(*arg).is_some() {
                bound.add_points_to(*param, [*arg]);
            }
        }
        bound
    }

    /// Callee state at a return, as seen from the caller after the call.
    pub fn unbind(&self, state: &PointsToInfo) -> PointsToInfo {
        let mut renaming: FxHashMap<ValueId, Vec<ValueId>> = FxHashMap::default();
        for (arg, param) in &self.pairs {
            renaming.entry(*param).or_default().push(*arg);
        }
        substitute(state, &renaming)
    }
}

fn rename_set(set: &ValueSet, renaming: &FxHashMap<ValueId, Vec<ValueId>>) -> ValueSet {
    let mut out = ValueSet::new();
    for v in set {
        match renaming.get(v) {
            Some(to) => out.extend(to.iter().copied()),
            None => {
                out.insert(*v);
            }
        }
    }
    out
}

fn rename_map(map: &PointsToMap, renaming: &FxHashMap<ValueId, Vec<ValueId>>) -> PointsToMap {
    let mut out = PointsToMap::new();
    for (k, set) in map {
        let renamed = rename_set(set, renaming);
        match renaming.get(k) {
            Some(to) => {
                for k2 in to {
                    out.entry(*k2).or_default().extend(renamed.iter().copied());
                }
            }
            None => out.entry(*k).or_default().extend(renamed),
        }
    }
    out
}

/// Rename keys and members of both maps. A renamed key is dropped in favor
/// of its new names; entries that collide are unioned.
pub(crate) fn substitute(
    state: &PointsToInfo,
    renaming: &FxHashMap<ValueId, Vec<ValueId>>,
) -> PointsToInfo {
    if renaming.is_empty() {
        return state.clone();
    }
    PointsToInfo::from_maps(
        rename_map(state.direct(), renaming),
        rename_map(state.field(), renaming),
    )
}
