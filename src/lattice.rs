// SPDX-License-Identifier: BSD-3-Clause
//! Lattice of points-to facts
//!
//! A [`PointsToInfo`] pairs two maps from values to sets of values. The
//! *direct* map records what a pointer may reference; the *field* map records
//! what may be stored inside the object a value refers to, with all fields of
//! one object collapsed onto its base.
//!
//! Both maps are ordered so that equality, hashing and printing do not depend
//! on insertion order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::ir::{Module, ValueId};

pub type ValueSet = BTreeSet<ValueId>;
pub type PointsToMap = BTreeMap<ValueId, ValueSet>;

/// A join-semilattice whose bottom element is `Default::default()`.
pub trait JoinSemiLattice: Clone + Default + PartialEq {
    /// Least upper bound, in place. Returns whether `self` changed.
    fn join(&mut self, other: &Self) -> bool;
}

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct PointsToInfo {
    pub(crate) direct: PointsToMap,
    pub(crate) field: PointsToMap,
}

// ------------------------------------------------------------------
// Constructors

impl PointsToInfo {
    #[inline]
    pub fn bottom() -> Self {
        Self::default()
    }

    pub fn from_maps(direct: PointsToMap, field: PointsToMap) -> Self {
        PointsToInfo { direct, field }
    }
}

// ------------------------------------------------------------------
// Queries

impl PointsToInfo {
    #[inline]
    pub fn direct(&self) -> &PointsToMap {
        &self.direct
    }

    #[inline]
    pub fn field(&self) -> &PointsToMap {
        &self.field
    }

    pub fn points_to(&self, v: ValueId) -> Option<&ValueSet> {
        self.direct.get(&v)
    }

    pub fn field_points_to(&self, v: ValueId) -> Option<&ValueSet> {
        self.field.get(&v)
    }

    /// Does `v` have at least one direct points-to fact?
    pub fn is_resolved(&self, v: ValueId) -> bool {
        self.direct.get(&v).is_some_and(|s| !s.is_empty())
    }

    /// Total number of facts in both maps
    pub fn size(&self) -> usize {
        self.direct.values().map(BTreeSet::len).sum::<usize>()
            + self.field.values().map(BTreeSet::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.field.is_empty()
    }
}

// ------------------------------------------------------------------
// Updates

impl PointsToInfo {
    /// Replace the direct entry for `v`.
    pub fn set_points_to(&mut self, v: ValueId, set: ValueSet) {
        self.direct.insert(v, set);
    }

    /// Replace the field entry for `v`.
    pub fn set_field_points_to(&mut self, v: ValueId, set: ValueSet) {
        self.field.insert(v, set);
    }

    pub fn add_points_to(&mut self, v: ValueId, targets: impl IntoIterator<Item = ValueId>) -> bool {
        union_into(self.direct.entry(v).or_default(), targets)
    }

    pub fn add_field_points_to(
        &mut self,
        v: ValueId,
        targets: impl IntoIterator<Item = ValueId>,
    ) -> bool {
        union_into(self.field.entry(v).or_default(), targets)
    }

    pub fn remove_points_to(&mut self, v: ValueId) -> Option<ValueSet> {
        self.direct.remove(&v)
    }

    /// Union every entry of `src` into `self`, creating missing entries (even
    /// empty ones). Returns whether `self` changed.
    pub fn merge(&mut self, src: &Self) -> bool {
        let d = merge_maps(&mut self.direct, &src.direct);
        let f = merge_maps(&mut self.field, &src.field);
        d || f
    }

    pub fn display<'a>(&'a self, module: &'a Module) -> DisplayPointsTo<'a> {
        DisplayPointsTo { info: self, module }
    }
}

fn union_into(dst: &mut ValueSet, src: impl IntoIterator<Item = ValueId>) -> bool {
    let before = dst.len();
    dst.extend(src);
    dst.len() != before
}

fn merge_maps(dst: &mut PointsToMap, src: &PointsToMap) -> bool {
    let mut changed = false;
    for (k, vs) in src {
        match dst.get_mut(k) {
            Some(set) => changed |= union_into(set, vs.iter().copied()),
            None => {
                dst.insert(*k, vs.clone());
                changed = true;
            }
        }
    }
    changed
}

// ------------------------------------------------------------------
// Traits

impl JoinSemiLattice for PointsToInfo {
    #[inline]
    fn join(&mut self, other: &Self) -> bool {
        self.merge(other)
    }
}

/// Renders a [`PointsToInfo`] with value names, e.g.,
/// `direct: { main:fp -> @f, @g ; } field: { }`
pub struct DisplayPointsTo<'a> {
    info: &'a PointsToInfo,
    module: &'a Module,
}

impl DisplayPointsTo<'_> {
    fn map(&self, f: &mut fmt::Formatter<'_>, map: &PointsToMap) -> fmt::Result {
        write!(f, "{{ ")?;
        for (k, vs) in map {
            write!(f, "{} -> ", self.module.value(*k))?;
            for (i, v) in vs.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", self.module.value(*v))?;
            }
            write!(f, " ; ")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for DisplayPointsTo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "direct: ")?;
        self.map(f, &self.info.direct)?;
        write!(f, " field: ")?;
        self.map(f, &self.info.field)
    }
}

#[cfg(test)]
mod tests {
    use super::{JoinSemiLattice, PointsToInfo, ValueSet};
    use crate::ir::ValueId;

    fn v(i: usize) -> ValueId {
        ValueId::new(i)
    }

    fn set(is: &[usize]) -> ValueSet {
        is.iter().map(|i| v(*i)).collect()
    }

    fn sample_a() -> PointsToInfo {
        let mut a = PointsToInfo::bottom();
        a.set_points_to(v(0), set(&[1, 2]));
        a.set_field_points_to(v(3), set(&[4]));
        a
    }

    fn sample_b() -> PointsToInfo {
        let mut b = PointsToInfo::bottom();
        b.set_points_to(v(0), set(&[2, 5]));
        b.set_points_to(v(6), ValueSet::new());
        b.set_field_points_to(v(7), set(&[1]));
        b
    }

    #[test]
    fn merge_commutes() {
        let mut ab = sample_a();
        ab.merge(&sample_b());
        let mut ba = sample_b();
        ba.merge(&sample_a());
        assert_eq!(ab, ba);
        assert_eq!(ab.points_to(v(0)), Some(&set(&[1, 2, 5])));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut ab = sample_a();
        assert!(ab.merge(&sample_b()));
        let once = ab.clone();
        assert!(!ab.merge(&sample_b()));
        assert_eq!(ab, once);
        assert!(!ab.join(&once));
    }

    #[test]
    fn merge_is_associative() {
        let mut c = PointsToInfo::bottom();
        c.set_points_to(v(9), set(&[0]));

        let mut left = sample_a();
        left.merge(&sample_b());
        left.merge(&c);

        let mut bc = sample_b();
        bc.merge(&c);
        let mut right = sample_a();
        right.merge(&bc);

        assert_eq!(left, right);
    }

    #[test]
    fn merge_creates_empty_entries() {
        let mut a = sample_a();
        assert!(a.merge(&sample_b()));
        assert_eq!(a.points_to(v(6)), Some(&ValueSet::new()));
        assert!(!a.is_resolved(v(6)));
    }

    #[test]
    fn merge_grows_monotonically() {
        let mut acc = PointsToInfo::bottom();
        let mut last = 0;
        for s in [sample_a(), sample_b(), sample_a()] {
            acc.merge(&s);
            assert!(acc.size() >= last);
            last = acc.size();
        }
        assert_eq!(last, 5);
    }
}
