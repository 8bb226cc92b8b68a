//! The evaluation cache: entry store, listener and counters, plus the
//! write-side entry points that start invalidation.
//!
//! Reads go through [`crate::evaluator::Evaluator`], which owns one of these
//! next to the cell model and the function evaluator.

use crate::entry::{CacheEntry, EntryState, FormulaEntry, PlainEntry};
use crate::error::InvariantViolation;
use crate::events::{CacheEvent, EvaluationListener, LogListener};
use crate::invalidate::{self, Invalidation};
use crate::location::Location;
use crate::settings::EvalSettings;
use crate::stats::CacheStats;
use crate::store::CacheStore;
use crate::value::Value;

pub struct EvaluationCache {
    pub(crate) store: CacheStore,
    listener: Option<Box<dyn EvaluationListener>>,
    settings: EvalSettings,
    pub(crate) stats: CacheStats,
}

impl Default for EvaluationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EvaluationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationCache")
            .field("entries", &self.store.len())
            .field("listener", &self.listener.is_some())
            .field("settings", &self.settings)
            .field("stats", &self.stats)
            .finish()
    }
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::with_settings(EvalSettings::default())
    }

    pub fn with_settings(settings: EvalSettings) -> Self {
        let listener: Option<Box<dyn EvaluationListener>> = if settings.log_events {
            Some(Box::new(LogListener))
        } else {
            None
        };
        Self {
            store: CacheStore::with_capacity(settings.initial_capacity),
            listener,
            settings,
            stats: CacheStats::new(),
        }
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    // =========================================================================
    // Listener
    // =========================================================================

    /// Attach a listener, returning the one previously attached.
    pub fn attach_listener(
        &mut self,
        listener: Box<dyn EvaluationListener>,
    ) -> Option<Box<dyn EvaluationListener>> {
        self.listener.replace(listener)
    }

    pub fn detach_listener(&mut self) -> Option<Box<dyn EvaluationListener>> {
        self.listener.take()
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Report an event. The closure is only run when a listener is attached.
    pub(crate) fn emit(&mut self, event: impl FnOnce() -> CacheEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_event(&event());
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// A plain cell's value changed (or was first written).
    ///
    /// Writing a value equal to the stored one is inert: nothing is stored,
    /// reported or invalidated. Writing `Blank` to a location with no entry
    /// is inert too. A formula entry at `loc` is replaced by a plain entry.
    pub fn notify_plain_value_changed(&mut self, loc: Location, value: Value) {
        let Some(entry) = self.store.get_mut(loc) else {
            if value.is_blank() {
                return;
            }
            self.store.put(loc, CacheEntry::plain(value.clone()));
            self.emit(|| CacheEvent::ChangeFromBlank { loc, value: Some(value) });
            return;
        };

        match entry {
            CacheEntry::Plain(plain) => {
                if plain.value() == &value {
                    return;
                }
                plain.update(value.clone());
            }
            CacheEntry::Formula(formula) => {
                if formula.is_valid() {
                    self.stats.entries_cleared += 1;
                }
                self.store.detach_inputs(loc);
                let consumers = self.take_consumers(loc);
                self.store.put(
                    loc,
                    CacheEntry::Plain(PlainEntry::with_consumers(value.clone(), consumers)),
                );
            }
        }

        self.emit(|| CacheEvent::EntryCleared { loc, value: Some(value) });
        self.invalidate_consumers(loc);
    }

    /// The formula at `loc` was defined or redefined.
    ///
    /// Always drops the cached value and invalidates consumers. The old input
    /// edges stay until the formula is evaluated again, so a change to a cell
    /// the old formula read still clears it once.
    pub fn notify_formula_changed(&mut self, loc: Location) {
        let previous = match self.store.get_mut(loc) {
            None => {
                self.store.put(loc, CacheEntry::formula());
                self.emit(|| CacheEvent::ChangeFromBlank { loc, value: None });
                return;
            }
            Some(CacheEntry::Formula(formula)) => {
                let previous = formula.clear_value();
                if previous.is_some() {
                    self.stats.entries_cleared += 1;
                }
                previous
            }
            Some(CacheEntry::Plain(plain)) => {
                let previous = plain.value().clone();
                self.stats.entries_cleared += 1;
                let consumers = self.take_consumers(loc);
                self.store.put(
                    loc,
                    CacheEntry::Formula(FormulaEntry::with_consumers(consumers)),
                );
                Some(previous)
            }
        };

        self.emit(|| CacheEvent::EntryCleared { loc, value: previous });
        self.invalidate_consumers(loc);
    }

    /// The cell at `loc` was deleted from the document.
    ///
    /// Its input edges are dropped. If no formula reads it the entry is
    /// removed; otherwise it becomes a blank plain entry so consumers keep
    /// their edge, and they are invalidated unless it was already blank.
    pub fn notify_cell_deleted(&mut self, loc: Location) {
        let Some(entry) = self.store.get(loc) else {
            return;
        };
        let was_blank = matches!(entry, CacheEntry::Plain(p) if p.value().is_blank());

        if entry.is_formula() {
            self.store.detach_inputs(loc);
        }
        let consumers = self.take_consumers(loc);

        if consumers.is_empty() {
            self.store.remove(loc);
            self.emit(|| CacheEvent::EntryRemoved { loc });
            return;
        }

        self.store.put(
            loc,
            CacheEntry::Plain(PlainEntry::with_consumers(Value::Blank, consumers)),
        );
        if !was_blank {
            self.emit(|| CacheEvent::EntryCleared { loc, value: Some(Value::Blank) });
            self.invalidate_consumers(loc);
        }
    }

    /// Drop every entry and edge. Reported as a single `CacheCleared` event.
    pub fn clear_all(&mut self) {
        let dropped = self.store.clear_all();
        self.stats.full_clears += 1;
        log::debug!("evaluation cache cleared ({} entries dropped)", dropped);
        self.emit(|| CacheEvent::CacheCleared);
    }

    fn take_consumers(&mut self, loc: Location) -> rustc_hash::FxHashSet<Location> {
        self.store
            .get_mut(loc)
            .map(CacheEntry::take_consumers)
            .unwrap_or_default()
    }

    fn invalidate_consumers(&mut self, origin: Location) -> Invalidation {
        let sorted = self.settings.sort_dependents;
        let listener = &mut self.listener;
        let report = invalidate::clear_dependents(&mut self.store, origin, sorted, &mut |event: CacheEvent| {
            if let Some(listener) = listener.as_mut() {
                listener.on_event(&event);
            }
        });

        self.stats.entries_cleared += report.cleared as u64;
        self.stats.max_invalidation_depth = self.stats.max_invalidation_depth.max(report.max_depth);
        if report.visited > 0 {
            log::debug!(
                "invalidated from {}: {} visited, {} cleared, depth {}",
                origin,
                report.visited,
                report.cleared,
                report.max_depth
            );
        }
        report
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn entry_state(&self, loc: Location) -> Option<EntryState> {
        self.store.state(loc)
    }

    /// Cached value without evaluating: plain values, or valid formula values.
    pub fn cached_value(&self, loc: Location) -> Option<&Value> {
        self.store.get(loc).and_then(CacheEntry::value)
    }

    /// Inputs of the formula at `loc`, sorted.
    pub fn inputs(&self, loc: Location) -> Vec<Location> {
        let mut inputs: Vec<Location> = self.store.inputs(loc).collect();
        inputs.sort_unstable();
        inputs
    }

    /// Consumers of the entry at `loc`, sorted.
    pub fn consumers(&self, loc: Location) -> Vec<Location> {
        let mut consumers: Vec<Location> = self.store.consumers(loc).collect();
        consumers.sort_unstable();
        consumers
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::new();
    }

    pub fn check_consistency(&self) -> Result<(), InvariantViolation> {
        self.store.check_consistency()
    }
}
