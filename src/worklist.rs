// SPDX-License-Identifier: BSD-3-Clause
use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::ir::FunctionId;

/// FIFO of functions awaiting (re-)analysis. Pushing a function that is
/// already queued does nothing.
#[derive(Clone, Debug, Default)]
pub struct FunctionWorklist {
    queue: VecDeque<FunctionId>,
    queued: FxHashSet<FunctionId>,
}

impl FunctionWorklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `f` was newly queued.
    pub fn push(&mut self, f: FunctionId) -> bool {
        if self.queued.insert(f) {
            self.queue.push_back(f);
            true
        } else {
            false
        }
    }

    pub fn pop(&mut self) -> Option<FunctionId> {
        let f = self.queue.pop_front()?;
        self.queued.remove(&f);
        Some(f)
    }

    pub fn contains(&self, f: FunctionId) -> bool {
        self.queued.contains(&f)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Extend<FunctionId> for FunctionWorklist {
    fn extend<T: IntoIterator<Item = FunctionId>>(&mut self, iter: T) {
        for f in iter {
            self.push(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FunctionWorklist;
    use crate::ir::FunctionId;

    #[test]
    fn push_is_idempotent() {
        let mut w = FunctionWorklist::new();
        assert!(w.push(FunctionId::new(0)));
        assert!(w.push(FunctionId::new(1)));
        assert!(!w.push(FunctionId::new(0)));
        assert_eq!(w.len(), 2);
        assert_eq!(w.pop(), Some(FunctionId::new(0)));
        assert!(!w.contains(FunctionId::new(0)));
        assert!(w.push(FunctionId::new(0)));
        assert_eq!(w.pop(), Some(FunctionId::new(1)));
        assert_eq!(w.pop(), Some(FunctionId::new(0)));
        assert!(w.is_empty());
        assert_eq!(w.pop(), None);
    }
}
