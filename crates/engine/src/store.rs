//! Location → entry mapping and edge maintenance.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B read A during its last evaluation"
//!        A ∈ inputs(B)  and  B ∈ consumers(A)
//! ```
//!
//! # Invariants
//!
//! 1. **Edge symmetry:** `A ∈ inputs(B)` iff `B ∈ consumers(A)`.
//! 2. **Inputs exist:** every location in an input set has an entry.
//! 3. **Consumers are formulas:** only formula entries have inputs.
//!
//! `get`/`put`/`remove` do not fix up edges; callers that replace or remove
//! an entry detach it first. `replace_inputs` is the only mutator that
//! touches both sides of an edge.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::entry::{CacheEntry, EntryState};
use crate::error::InvariantViolation;
use crate::location::Location;

#[derive(Debug, Default, Clone)]
pub struct CacheStore {
    entries: FxHashMap<Location, CacheEntry>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// O(1) lookup. Never creates.
    pub fn get(&self, loc: Location) -> Option<&CacheEntry> {
        self.entries.get(&loc)
    }

    pub(crate) fn get_mut(&mut self, loc: Location) -> Option<&mut CacheEntry> {
        self.entries.get_mut(&loc)
    }

    /// Insert or replace, returning the previous entry.
    pub fn put(&mut self, loc: Location, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(loc, entry)
    }

    pub fn remove(&mut self, loc: Location) -> Option<CacheEntry> {
        self.entries.remove(&loc)
    }

    /// Drop every entry and every edge. Returns how many entries were dropped.
    pub fn clear_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, loc: Location) -> bool {
        self.entries.contains_key(&loc)
    }

    pub fn state(&self, loc: Location) -> Option<EntryState> {
        self.get(loc).map(CacheEntry::state)
    }

    /// Locations the formula at `loc` read during its last evaluation.
    pub fn inputs(&self, loc: Location) -> impl Iterator<Item = Location> + '_ {
        self.get(loc)
            .and_then(CacheEntry::as_formula)
            .into_iter()
            .flat_map(|f| f.inputs().iter().copied())
    }

    /// Formula entries that read `loc` during their last evaluation.
    pub fn consumers(&self, loc: Location) -> impl Iterator<Item = Location> + '_ {
        self.get(loc)
            .into_iter()
            .flat_map(|e| e.consumers().iter().copied())
    }

    /// Replace all input edges of the formula at `consumer`.
    ///
    /// 1. Removes `consumer` from the consumer set of inputs no longer read
    /// 2. Adds `consumer` to the consumer set of newly read inputs
    /// 3. Stores the new input set
    ///
    /// Inputs present in both sets are untouched. Pass an empty set to detach.
    ///
    /// # Panics
    ///
    /// If `consumer` is not a formula entry, or an input has no entry, or an
    /// existing back-edge is missing. Any of these means the graph is corrupt.
    pub(crate) fn replace_inputs(&mut self, consumer: Location, new_inputs: FxHashSet<Location>) {
        let old_inputs = match self.get_mut(consumer).and_then(CacheEntry::as_formula_mut) {
            Some(f) => std::mem::take(f.inputs_mut()),
            None => panic!("replace_inputs on {consumer}, which is not a formula entry"),
        };

        for input in old_inputs.difference(&new_inputs) {
            let removed = self.edge_target(*input, consumer).consumers_mut().remove(&consumer);
            assert!(
                removed,
                "{}",
                InvariantViolation::MissingConsumerEdge {
                    consumer,
                    input: *input
                }
            );
        }
        for input in new_inputs.difference(&old_inputs) {
            self.edge_target(*input, consumer).consumers_mut().insert(consumer);
        }

        if let Some(f) = self.get_mut(consumer).and_then(CacheEntry::as_formula_mut) {
            *f.inputs_mut() = new_inputs;
        }
    }

    /// Remove all input edges of the formula at `consumer`.
    pub(crate) fn detach_inputs(&mut self, consumer: Location) {
        self.replace_inputs(consumer, FxHashSet::default());
    }

    fn edge_target(&mut self, input: Location, consumer: Location) -> &mut CacheEntry {
        match self.entries.get_mut(&input) {
            Some(entry) => entry,
            None => panic!("{}", InvariantViolation::MissingInput { consumer, input }),
        }
    }

    /// Verify the edge invariants over the whole store.
    pub fn check_consistency(&self) -> Result<(), InvariantViolation> {
        for (&loc, entry) in &self.entries {
            // inputs → consumers
            if let Some(f) = entry.as_formula() {
                if f.evaluating_frame().is_some() {
                    return Err(InvariantViolation::StuckEvaluating(loc));
                }
                for &input in f.inputs() {
                    let Some(target) = self.entries.get(&input) else {
                        return Err(InvariantViolation::MissingInput { consumer: loc, input });
                    };
                    if !target.consumers().contains(&loc) {
                        return Err(InvariantViolation::MissingConsumerEdge { consumer: loc, input });
                    }
                }
            }

            // consumers → inputs
            for &consumer in entry.consumers() {
                match self.entries.get(&consumer).and_then(CacheEntry::as_formula) {
                    Some(f) if f.inputs().contains(&loc) => {}
                    Some(_) => {
                        return Err(InvariantViolation::MissingInputEdge { consumer, input: loc });
                    }
                    None => {
                        return Err(InvariantViolation::ConsumerNotFormula { consumer, input: loc });
                    }
                }
            }
        }
        Ok(())
    }

    /// Check all invariants. Panics if any are violated.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        if let Err(e) = self.check_consistency() {
            panic!("cache store inconsistent: {e}");
        }
    }
}
