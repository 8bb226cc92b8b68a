//! Evaluation counters.
//!
//! Accumulated over the lifetime of one cache (reset explicitly, not by
//! `clear_all`). Cheap enough to keep always on; used for debug logging and
//! for tests that check how much work a call did.

/// Counters for one evaluation session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from a cached value (plain or formula).
    pub hits: u64,

    /// First reads of plain/blank cells that populated the cache.
    pub plain_reads: u64,

    /// Formula evaluations that completed (cached or not).
    pub evaluations: u64,

    /// Calls into the function evaluator, including passes stopped at the
    /// inline depth limit.
    pub attempts: u64,

    /// Circular references detected.
    pub cycles: u64,

    /// Cached values dropped by a write or an invalidation pass: formula
    /// values, and plain values replaced by a formula.
    pub entries_cleared: u64,

    /// Deepest invalidation level reached by any single write.
    pub max_invalidation_depth: usize,

    /// Whole-cache clears.
    pub full_clears: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format as a concise one-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} hits, {} reads, {} evals ({} attempts), cycles={}, cleared={}",
            self.hits,
            self.plain_reads,
            self.evaluations,
            self.attempts,
            self.cycles,
            self.entries_cleared,
        )
    }

    /// Format: `[evalcache] hits=12 reads=6 evals=5 attempts=9 cycles=0 cleared=4 depth=3 clears=1`
    pub fn log_line(&self) -> String {
        format!(
            "[evalcache] hits={} reads={} evals={} attempts={} cycles={} cleared={} depth={} clears={}",
            self.hits,
            self.plain_reads,
            self.evaluations,
            self.attempts,
            self.cycles,
            self.entries_cleared,
            self.max_invalidation_depth,
            self.full_clears,
        )
    }

    /// Fraction of reads answered from cache, or `None` before any read.
    pub fn hit_ratio(&self) -> Option<f64> {
        let reads = self.hits + self.plain_reads + self.evaluations;
        if reads == 0 {
            None
        } else {
            Some(self.hits as f64 / reads as f64)
        }
    }
}
