//! Observability hooks for the evaluation cache.
//!
//! Every cache hit, first read of a plain cell, evaluation start/end and
//! invalidation step is reported to an optional listener. The test harness
//! uses the `Display` form of each event as a trace line to check exactly
//! which entries were evaluated and cleared.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::location::Location;
use crate::value::Value;

/// Events emitted by the cache, the evaluator and the invalidation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheEvent {
    /// `evaluate` or a formula read returned an already cached value.
    CacheHit { loc: Location, value: Value },

    /// First read of a plain (or blank) cell, populating the cache.
    PlainValueRead { loc: Location, value: Value },

    /// A formula entry started evaluating.
    StartEvaluate { loc: Location },

    /// A formula entry finished evaluating.
    /// `cached` is false when the value depended on a circular reference.
    EndEvaluate { loc: Location, value: Value, cached: bool },

    /// The entry at the origin of a write was cleared (depth 0).
    /// Holds the new plain value, or the formula value that was dropped.
    EntryCleared { loc: Location, value: Option<Value> },

    /// A consumer was cleared during invalidation (depth >= 1).
    DependentCleared {
        loc: Location,
        depth: usize,
        previous: Option<Value>,
    },

    /// A write reached a location that had no entry yet.
    ChangeFromBlank { loc: Location, value: Option<Value> },

    /// A deleted cell's entry was dropped from the store.
    EntryRemoved { loc: Location },

    /// The whole store was wiped.
    CacheCleared,
}

impl CacheEvent {
    pub fn location(&self) -> Option<Location> {
        match self {
            CacheEvent::CacheHit { loc, .. }
            | CacheEvent::PlainValueRead { loc, .. }
            | CacheEvent::StartEvaluate { loc }
            | CacheEvent::EndEvaluate { loc, .. }
            | CacheEvent::EntryCleared { loc, .. }
            | CacheEvent::DependentCleared { loc, .. }
            | CacheEvent::ChangeFromBlank { loc, .. }
            | CacheEvent::EntryRemoved { loc } => Some(*loc),
            CacheEvent::CacheCleared => None,
        }
    }

    pub fn is_invalidation(&self) -> bool {
        matches!(
            self,
            CacheEvent::EntryCleared { .. } | CacheEvent::DependentCleared { .. }
        )
    }
}

/// Trace line, e.g. `hit A1 46`, `clear2 B1 8`, `end A1 #CYCLE! (uncached)`.
impl std::fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn opt(f: &mut std::fmt::Formatter<'_>, value: &Option<Value>) -> std::fmt::Result {
            match value {
                Some(v) => write!(f, " {}", v),
                None => Ok(()),
            }
        }

        match self {
            CacheEvent::CacheHit { loc, value } => write!(f, "hit {} {}", loc.a1(), value),
            CacheEvent::PlainValueRead { loc, value } => write!(f, "value {} {}", loc.a1(), value),
            CacheEvent::StartEvaluate { loc } => write!(f, "start {}", loc.a1()),
            CacheEvent::EndEvaluate { loc, value, cached } => {
                write!(f, "end {} {}", loc.a1(), value)?;
                if !cached {
                    f.write_str(" (uncached)")?;
                }
                Ok(())
            }
            CacheEvent::EntryCleared { loc, value } => {
                write!(f, "clear {}", loc.a1())?;
                opt(f, value)
            }
            CacheEvent::DependentCleared { loc, depth, previous } => {
                write!(f, "clear{} {}", depth, loc.a1())?;
                opt(f, previous)
            }
            CacheEvent::ChangeFromBlank { loc, value } => {
                write!(f, "changeFromBlank {}", loc.a1())?;
                opt(f, value)
            }
            CacheEvent::EntryRemoved { loc } => write!(f, "remove {}", loc.a1()),
            CacheEvent::CacheCleared => f.write_str("clearAll"),
        }
    }
}

/// Receives cache events. Attached to a cache with `attach_listener`.
pub trait EvaluationListener: Send {
    fn on_event(&mut self, event: &CacheEvent);
}

impl<F> EvaluationListener for F
where
    F: FnMut(&CacheEvent) + Send,
{
    fn on_event(&mut self, event: &CacheEvent) {
        self(event)
    }
}

/// Forwards every event to `log::trace!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl EvaluationListener for LogListener {
    fn on_event(&mut self, event: &CacheEvent) {
        log::trace!(target: "gridcache::events", "{}", event);
    }
}

/// Shared event collector.
///
/// Clone one handle into the cache as its listener and keep the other to
/// inspect what was recorded.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<CacheEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CacheEvent>> {
        // A panicking listener cannot leave the vector half-written.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, event: CacheEvent) {
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drain recorded events.
    pub fn take(&self) -> Vec<CacheEvent> {
        std::mem::take(&mut *self.lock())
    }

    /// Drain recorded events as trace lines.
    pub fn take_trace(&self) -> Vec<String> {
        self.take().iter().map(ToString::to_string).collect()
    }

    /// Filter to invalidation events (depth 0 and dependents).
    pub fn invalidations(&self) -> Vec<CacheEvent> {
        self.lock()
            .iter()
            .filter(|e| e.is_invalidation())
            .cloned()
            .collect()
    }

    /// Filter to cache hits.
    pub fn hits(&self) -> Vec<Location> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                CacheEvent::CacheHit { loc, .. } => Some(*loc),
                _ => None,
            })
            .collect()
    }

    /// Filter to evaluation starts.
    pub fn evaluations(&self) -> Vec<Location> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                CacheEvent::StartEvaluate { loc } => Some(*loc),
                _ => None,
            })
            .collect()
    }
}

impl EvaluationListener for EventLog {
    fn on_event(&mut self, event: &CacheEvent) {
        self.push(event.clone());
    }
}
