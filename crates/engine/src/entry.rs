//! Per-location cache entries.
//!
//! Two variants: a plain entry holding a literal value, and a formula entry
//! holding an optional computed value plus its input and consumer edges.
//! Edges are keyed by [`Location`], never by entry identity.
//!
//! # Formula state machine
//!
//! ```text
//! Empty --evaluate--> Evaluating --success--> Valid
//!                     Evaluating --cycle----> Empty
//! Valid --invalidate / redefine--> Empty
//! ```

use rustc_hash::FxHashSet;

use crate::location::Location;
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum CacheEntry {
    Plain(PlainEntry),
    Formula(FormulaEntry),
}

/// Entry for a non-formula cell (including blank cells that have been read).
#[derive(Debug, Clone)]
pub struct PlainEntry {
    value: Value,
    consumers: FxHashSet<Location>,
}

/// Computation state of a formula entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaState {
    /// No cached value; needs evaluation.
    Empty,
    /// On the evaluation stack; `frame` identifies the stack frame.
    /// Frames pushed later have larger ids.
    Evaluating { frame: usize },
    /// Cached value with up-to-date input edges.
    Valid(Value),
}

#[derive(Debug, Clone)]
pub struct FormulaEntry {
    state: FormulaState,
    /// Locations read by the last completed evaluation.
    inputs: FxHashSet<Location>,
    /// Formula entries whose last evaluation read this one.
    consumers: FxHashSet<Location>,
}

/// Externally visible summary of an entry, for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Plain,
    Empty,
    Evaluating,
    Valid,
}

impl CacheEntry {
    pub fn plain(value: Value) -> Self {
        CacheEntry::Plain(PlainEntry::new(value))
    }

    pub fn formula() -> Self {
        CacheEntry::Formula(FormulaEntry::new())
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CacheEntry::Formula(_))
    }

    /// The value a reader would get without evaluating, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            CacheEntry::Plain(p) => Some(&p.value),
            CacheEntry::Formula(f) => f.value(),
        }
    }

    pub fn state(&self) -> EntryState {
        match self {
            CacheEntry::Plain(_) => EntryState::Plain,
            CacheEntry::Formula(f) => match f.state {
                FormulaState::Empty => EntryState::Empty,
                FormulaState::Evaluating { .. } => EntryState::Evaluating,
                FormulaState::Valid(_) => EntryState::Valid,
            },
        }
    }

    pub fn consumers(&self) -> &FxHashSet<Location> {
        match self {
            CacheEntry::Plain(p) => &p.consumers,
            CacheEntry::Formula(f) => &f.consumers,
        }
    }

    pub(crate) fn consumers_mut(&mut self) -> &mut FxHashSet<Location> {
        match self {
            CacheEntry::Plain(p) => &mut p.consumers,
            CacheEntry::Formula(f) => &mut f.consumers,
        }
    }

    /// Take the consumer set, leaving this entry with none.
    pub(crate) fn take_consumers(&mut self) -> FxHashSet<Location> {
        std::mem::take(self.consumers_mut())
    }

    pub fn as_formula(&self) -> Option<&FormulaEntry> {
        match self {
            CacheEntry::Formula(f) => Some(f),
            CacheEntry::Plain(_) => None,
        }
    }

    pub(crate) fn as_formula_mut(&mut self) -> Option<&mut FormulaEntry> {
        match self {
            CacheEntry::Formula(f) => Some(f),
            CacheEntry::Plain(_) => None,
        }
    }
}

impl PlainEntry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            consumers: FxHashSet::default(),
        }
    }

    pub(crate) fn with_consumers(value: Value, consumers: FxHashSet<Location>) -> Self {
        Self { value, consumers }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Store a new value. Returns false (and changes nothing) if it is
    /// structurally equal to the current one.
    pub fn update(&mut self, value: Value) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        true
    }
}

impl FormulaEntry {
    pub fn new() -> Self {
        Self {
            state: FormulaState::Empty,
            inputs: FxHashSet::default(),
            consumers: FxHashSet::default(),
        }
    }

    pub(crate) fn with_consumers(consumers: FxHashSet<Location>) -> Self {
        Self {
            consumers,
            ..Self::new()
        }
    }

    pub fn state(&self) -> &FormulaState {
        &self.state
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.state {
            FormulaState::Valid(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, FormulaState::Valid(_))
    }

    /// Stack frame id if this entry is mid-evaluation.
    pub fn evaluating_frame(&self) -> Option<usize> {
        match self.state {
            FormulaState::Evaluating { frame } => Some(frame),
            _ => None,
        }
    }

    pub fn inputs(&self) -> &FxHashSet<Location> {
        &self.inputs
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut FxHashSet<Location> {
        &mut self.inputs
    }

    /// Drop the cached value. Input edges are left alone; the next
    /// evaluation rebuilds them. Returns the value that was dropped.
    pub fn clear_value(&mut self) -> Option<Value> {
        match std::mem::replace(&mut self.state, FormulaState::Empty) {
            FormulaState::Valid(v) => Some(v),
            FormulaState::Empty => None,
            // Mid-evaluation entries keep their guard; nothing is cached yet.
            evaluating @ FormulaState::Evaluating { .. } => {
                self.state = evaluating;
                None
            }
        }
    }

    pub(crate) fn begin_evaluation(&mut self, frame: usize) {
        debug_assert!(!self.is_valid(), "evaluating a valid entry");
        self.state = FormulaState::Evaluating { frame };
    }

    /// Leave the evaluating state. `None` leaves the entry empty.
    pub(crate) fn finish_evaluation(&mut self, value: Option<Value>) {
        self.state = match value {
            Some(v) => FormulaState::Valid(v),
            None => FormulaState::Empty,
        };
    }
}

impl Default for FormulaEntry {
    fn default() -> Self {
        Self::new()
    }
}
