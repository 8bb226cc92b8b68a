//! Breadth-first invalidation along consumer edges.
//!
//! Starting from a changed entry, every formula entry reachable through
//! consumer edges has its cached value dropped and is reported once, with its
//! distance from the origin. Input edges are not touched; the next
//! evaluation of each cleared formula rebuilds them.
//!
//! # Cost
//!
//! One pass is O(number of reachable consumers), plus a sort per level when
//! ordering is enabled. Entries that are already empty are still visited and
//! their consumers followed: an empty entry may sit between the origin and a
//! valid consumer (for example a cycle member that was never cached).

use rustc_hash::FxHashSet;

use crate::entry::CacheEntry;
use crate::events::CacheEvent;
use crate::location::Location;
use crate::store::CacheStore;

/// Outcome of one invalidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Consumers visited (and reported), excluding the origin.
    pub visited: usize,
    /// Consumers that actually held a value.
    pub cleared: usize,
    /// Deepest level reached; 0 if the origin had no consumers.
    pub max_depth: usize,
}

/// Clear every consumer reachable from `origin`.
///
/// Levels are visited in order of depth; within a level, in location order
/// when `sorted` is set. The origin itself is neither cleared nor reported
/// here, and is never revisited if a consumer chain leads back to it.
pub(crate) fn clear_dependents(
    store: &mut CacheStore,
    origin: Location,
    sorted: bool,
    emit: &mut dyn FnMut(CacheEvent),
) -> Invalidation {
    let mut report = Invalidation::default();
    let mut visited: FxHashSet<Location> = FxHashSet::default();
    visited.insert(origin);

    let mut level = next_level(store, &[origin], &mut visited, sorted);
    let mut depth = 1;

    while !level.is_empty() {
        for &loc in &level {
            let previous = match store.get_mut(loc).and_then(CacheEntry::as_formula_mut) {
                Some(f) => f.clear_value(),
                None => panic!("consumer {loc} of the invalidation pass from {origin} is not a formula entry"),
            };
            if previous.is_some() {
                report.cleared += 1;
            }
            report.visited += 1;
            emit(CacheEvent::DependentCleared { loc, depth, previous });
        }
        report.max_depth = depth;

        level = next_level(store, &level, &mut visited, sorted);
        depth += 1;
    }

    report
}

/// Unvisited consumers of `current`, marked visited.
fn next_level(
    store: &CacheStore,
    current: &[Location],
    visited: &mut FxHashSet<Location>,
    sorted: bool,
) -> Vec<Location> {
    let mut next: Vec<Location> = current
        .iter()
        .flat_map(|&loc| store.consumers(loc))
        .filter(|&c| visited.insert(c))
        .collect();
    if sorted {
        next.sort_unstable();
    }
    next
}
