//! Evaluation orchestrator.
//!
//! `evaluate` answers from the cache when it can. On a miss it evaluates the
//! formula, resolving each input at the moment the function evaluator asks
//! for it. An input that needs evaluating itself is evaluated inline, nested
//! inside the resolver call, up to `calc.inlineDepth` levels deep. Past that
//! the unfinished formulas move onto an explicit work stack, so the length
//! of a dependency chain is bounded by memory, not by the call stack.
//!
//! # Blocked attempts
//!
//! When a formula at the depth limit asks for an input that needs
//! evaluating, the input is started as a new stack frame and the attempt
//! stops. Later resolver calls in that pass return `Blank` and are neither
//! recorded nor followed, and the value the function evaluator returns is
//! discarded. The formulas nested above it stop the same way, and each one
//! is attempted again after the frame above it finishes. Function
//! evaluation is deterministic, so a retry makes the same calls up to the
//! blocking one. Those calls were already reported and are replayed
//! silently.
//!
//! # Cycles
//!
//! An input that is itself being evaluated resolves to `#CYCLE!` and taints
//! the reader with that frame's id. A tainted result is not cached: the
//! reader is left `Empty` and its value is held as *provisional* for the
//! rest of this `evaluate` call. A taint only lasts while the frame it names
//! is unfinished. The frame that closes the cycle stays `Empty` too, and
//! formulas that read it afterwards cache the error like any other value.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cache::EvaluationCache;
use crate::entry::{CacheEntry, EntryState, FormulaState};
use crate::error::EvalError;
use crate::events::{CacheEvent, EvaluationListener};
use crate::location::Location;
use crate::model::{CellKind, CellModel, FunctionEvaluator};
use crate::settings::EvalSettings;
use crate::value::Value;

/// Cache plus the collaborators needed to fill it.
pub struct Evaluator<M, E> {
    cache: EvaluationCache,
    model: M,
    functions: E,
}

struct Frame<F> {
    loc: Location,
    /// Increases with start order.
    id: usize,
    formula: F,
    /// Resolver calls already reported by an earlier, blocked attempt.
    replayed: usize,
}

/// Value of a formula that finished without being cached.
struct Provisional {
    value: Value,
    taint: Option<usize>,
}

struct Finished {
    value: Value,
    taint: Option<usize>,
}

enum Step<F> {
    Done(Finished),
    /// Frames to resume, innermost first. The attempted frame is last.
    Blocked(Vec<Frame<F>>),
}

enum Halt<F> {
    Blocked(Vec<Frame<F>>),
    Failed(EvalError),
}

/// Resolver state for one attempt.
struct Reads<F> {
    depth: usize,
    replayed: usize,
    calls: usize,
    inputs: FxHashSet<Location>,
    taint: Option<usize>,
    halt: Option<Halt<F>>,
}

impl<F> Reads<F> {
    fn new(depth: usize, replayed: usize) -> Self {
        Self {
            depth,
            replayed,
            calls: 0,
            inputs: FxHashSet::default(),
            taint: None,
            halt: None,
        }
    }
}

/// Store contents for an input, copied out before the store is mutated.
enum Lookup {
    Absent,
    Cached(Value),
    Evaluating(usize),
    Empty,
}

fn lowest(current: Option<usize>, id: usize) -> Option<usize> {
    Some(current.map_or(id, |c| c.min(id)))
}

fn plain_value<M: CellModel>(model: &M, loc: Location, kind: CellKind) -> Value {
    match kind {
        CellKind::Blank => Value::Blank,
        _ => model.read_plain_value(loc),
    }
}

impl<M, E> Evaluator<M, E>
where
    M: CellModel,
    E: FunctionEvaluator<M::Formula>,
{
    pub fn new(model: M, functions: E) -> Self {
        Self::with_cache(EvaluationCache::new(), model, functions)
    }

    pub fn with_settings(model: M, functions: E, settings: EvalSettings) -> Self {
        Self::with_cache(EvaluationCache::with_settings(settings), model, functions)
    }

    pub fn with_cache(cache: EvaluationCache, model: M, functions: E) -> Self {
        Self {
            cache,
            model,
            functions,
        }
    }

    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut EvaluationCache {
        &mut self.cache
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Mutable access to the cell model. Edits made through it must be
    /// followed by the matching `notify_*` call.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn functions(&self) -> &E {
        &self.functions
    }

    pub fn into_parts(self) -> (EvaluationCache, M, E) {
        (self.cache, self.model, self.functions)
    }

    pub fn attach_listener(
        &mut self,
        listener: Box<dyn EvaluationListener>,
    ) -> Option<Box<dyn EvaluationListener>> {
        self.cache.attach_listener(listener)
    }

    pub fn detach_listener(&mut self) -> Option<Box<dyn EvaluationListener>> {
        self.cache.detach_listener()
    }

    pub fn notify_plain_value_changed(&mut self, loc: Location, value: Value) {
        self.cache.notify_plain_value_changed(loc, value);
    }

    pub fn notify_formula_changed(&mut self, loc: Location) {
        self.cache.notify_formula_changed(loc);
    }

    pub fn notify_cell_deleted(&mut self, loc: Location) {
        self.cache.notify_cell_deleted(loc);
    }

    pub fn clear_all(&mut self) {
        self.cache.clear_all();
    }

    /// Value of the cell at `loc`, evaluating whatever is not cached.
    ///
    /// Circular references and formula errors come back as `Ok` error values.
    /// `Err` means the cell model and the cache disagree; every entry that was
    /// mid-evaluation is reset to empty before returning.
    pub fn evaluate(&mut self, loc: Location) -> Result<Value, EvalError> {
        match self.cache.store.get(loc) {
            None => {
                let kind = self.model.cell_kind(loc);
                if kind != CellKind::Formula {
                    let value = plain_value(&self.model, loc, kind);
                    self.cache.store.put(loc, CacheEntry::plain(value.clone()));
                    self.cache.stats.plain_reads += 1;
                    self.cache.emit(|| CacheEvent::PlainValueRead {
                        loc,
                        value: value.clone(),
                    });
                    return Ok(value);
                }
                self.cache.store.put(loc, CacheEntry::formula());
            }
            Some(entry) => match entry.state() {
                EntryState::Plain | EntryState::Valid => {
                    let value = entry.value().cloned().unwrap_or_default();
                    self.cache.stats.hits += 1;
                    self.cache.emit(|| CacheEvent::CacheHit {
                        loc,
                        value: value.clone(),
                    });
                    return Ok(value);
                }
                EntryState::Evaluating => return Err(EvalError::Reentrant(loc)),
                EntryState::Empty => {}
            },
        }

        let mut pass = Pass::new(&mut self.cache, &self.model);
        let result = pass.run(&self.functions, loc);
        if result.is_err() {
            pass.abandon();
        }
        log::debug!("evaluated {}: {}", loc, self.cache.stats.log_line());
        result
    }
}

/// State of one top-level `evaluate` call.
struct Pass<'a, M: CellModel> {
    cache: &'a mut EvaluationCache,
    model: &'a M,
    inline_depth: usize,
    /// Frames started and not yet finished, by ascending id.
    active: Vec<(usize, Location)>,
    provisional: FxHashMap<Location, Provisional>,
    next_id: usize,
}

impl<'a, M: CellModel> Pass<'a, M> {
    fn new(cache: &'a mut EvaluationCache, model: &'a M) -> Self {
        let inline_depth = cache.settings().inline_depth;
        Self {
            cache,
            model,
            inline_depth,
            active: Vec::new(),
            provisional: FxHashMap::default(),
            next_id: 0,
        }
    }

    fn run<E>(&mut self, functions: &E, root: Location) -> Result<Value, EvalError>
    where
        E: FunctionEvaluator<M::Formula>,
    {
        let mut stack = vec![self.start_frame(root)?];

        while let Some(frame) = stack.pop() {
            match self.evaluate_frame(functions, frame, 0)? {
                Step::Blocked(chain) => stack.extend(chain.into_iter().rev()),
                Step::Done(finished) => {
                    if stack.is_empty() {
                        return Ok(finished.value);
                    }
                }
            }
        }

        unreachable!("evaluation stack drained before {root} finished")
    }

    /// Reset every unfinished frame to `Empty`.
    fn abandon(&mut self) {
        for (_, loc) in self.active.drain(..) {
            if let Some(f) = self.cache.store.get_mut(loc).and_then(CacheEntry::as_formula_mut) {
                f.finish_evaluation(None);
            }
        }
    }

    fn is_live(&self, id: usize) -> bool {
        self.active.binary_search_by_key(&id, |&(id, _)| id).is_ok()
    }

    fn start_frame(&mut self, loc: Location) -> Result<Frame<M::Formula>, EvalError> {
        let formula = self.model.read_formula(loc).ok_or(EvalError::MissingFormula(loc))?;
        let id = self.next_id;
        self.next_id += 1;

        match self.cache.store.get_mut(loc).and_then(CacheEntry::as_formula_mut) {
            Some(f) => f.begin_evaluation(id),
            None => panic!("evaluating {loc}, which has no formula entry"),
        }
        self.active.push((id, loc));
        self.cache.emit(|| CacheEvent::StartEvaluate { loc });

        Ok(Frame {
            loc,
            id,
            formula,
            replayed: 0,
        })
    }

    /// Attempt `frame` once, evaluating inputs inline while under the depth limit.
    fn evaluate_frame<E>(
        &mut self,
        functions: &E,
        mut frame: Frame<M::Formula>,
        depth: usize,
    ) -> Result<Step<M::Formula>, EvalError>
    where
        E: FunctionEvaluator<M::Formula>,
    {
        let mut reads = Reads::new(depth, frame.replayed);
        let value = functions.apply(&frame.formula, &mut |input: Location| {
            self.resolve(functions, &mut reads, input)
        });
        self.cache.stats.attempts += 1;

        match reads.halt.take() {
            Some(Halt::Failed(e)) => Err(e),
            Some(Halt::Blocked(mut chain)) => {
                frame.replayed = frame.replayed.max(reads.calls);
                chain.push(frame);
                Ok(Step::Blocked(chain))
            }
            None => Ok(Step::Done(self.finish(frame, value, reads))),
        }
    }

    fn resolve<E>(&mut self, functions: &E, reads: &mut Reads<M::Formula>, input: Location) -> Value
    where
        E: FunctionEvaluator<M::Formula>,
    {
        if reads.halt.is_some() {
            return Value::Blank;
        }
        let report = reads.calls >= reads.replayed;
        reads.calls += 1;
        reads.inputs.insert(input);

        if let Some(p) = self.provisional.get(&input) {
            let (value, taint) = (p.value.clone(), p.taint);
            self.carry_taint(reads, taint);
            return value;
        }

        let lookup = match self.cache.store.get(input) {
            None => Lookup::Absent,
            Some(CacheEntry::Plain(p)) => Lookup::Cached(p.value().clone()),
            Some(CacheEntry::Formula(f)) => match f.state() {
                FormulaState::Valid(v) => Lookup::Cached(v.clone()),
                FormulaState::Evaluating { frame } => Lookup::Evaluating(*frame),
                FormulaState::Empty => Lookup::Empty,
            },
        };

        match lookup {
            Lookup::Cached(value) => {
                if report {
                    self.cache.stats.hits += 1;
                    self.cache.emit(|| CacheEvent::CacheHit {
                        loc: input,
                        value: value.clone(),
                    });
                }
                value
            }
            Lookup::Evaluating(id) => {
                reads.taint = lowest(reads.taint, id);
                Value::CIRCULAR
            }
            Lookup::Empty => self.evaluate_input(functions, reads, input),
            Lookup::Absent => {
                let kind = self.model.cell_kind(input);
                if kind == CellKind::Formula {
                    self.cache.store.put(input, CacheEntry::formula());
                    return self.evaluate_input(functions, reads, input);
                }
                let value = plain_value(self.model, input, kind);
                self.cache.store.put(input, CacheEntry::plain(value.clone()));
                self.cache.stats.plain_reads += 1;
                self.cache.emit(|| CacheEvent::PlainValueRead {
                    loc: input,
                    value: value.clone(),
                });
                value
            }
        }
    }

    /// Evaluate a formula input on behalf of the attempt owning `reads`.
    fn evaluate_input<E>(&mut self, functions: &E, reads: &mut Reads<M::Formula>, input: Location) -> Value
    where
        E: FunctionEvaluator<M::Formula>,
    {
        let frame = match self.start_frame(input) {
            Ok(frame) => frame,
            Err(e) => {
                reads.halt = Some(Halt::Failed(e));
                return Value::Blank;
            }
        };
        if reads.depth >= self.inline_depth {
            reads.halt = Some(Halt::Blocked(vec![frame]));
            return Value::Blank;
        }

        match self.evaluate_frame(functions, frame, reads.depth + 1) {
            Ok(Step::Done(finished)) => {
                self.carry_taint(reads, finished.taint);
                finished.value
            }
            Ok(Step::Blocked(chain)) => {
                reads.halt = Some(Halt::Blocked(chain));
                Value::Blank
            }
            Err(e) => {
                reads.halt = Some(Halt::Failed(e));
                Value::Blank
            }
        }
    }

    /// Taint `reads` with `taint` if that frame is still unfinished.
    fn carry_taint(&self, reads: &mut Reads<M::Formula>, taint: Option<usize>) {
        if let Some(id) = taint.filter(|&id| self.is_live(id)) {
            reads.taint = lowest(reads.taint, id);
        }
    }

    /// Commit a completed attempt: rebuild input edges, then store the value
    /// unless it depended on an unfinished frame.
    fn finish(&mut self, frame: Frame<M::Formula>, value: Value, reads: Reads<M::Formula>) -> Finished {
        let Frame { loc, id, .. } = frame;
        let taint = reads.taint;

        self.cache.store.replace_inputs(loc, reads.inputs);
        if let Ok(i) = self.active.binary_search_by_key(&id, |&(id, _)| id) {
            self.active.remove(i);
        }

        let cached = taint.is_none();
        if taint == Some(id) {
            self.cache.stats.cycles += 1;
            log::debug!("circular reference closes at {}", loc);
        }
        if let Some(f) = self.cache.store.get_mut(loc).and_then(CacheEntry::as_formula_mut) {
            f.finish_evaluation(cached.then(|| value.clone()));
        }

        if cached {
            // A value tainted by this frame was computed on a path it did not take.
            if !self.provisional.is_empty() {
                self.provisional.retain(|_, p| p.taint != Some(id));
            }
        } else {
            self.provisional.insert(
                loc,
                Provisional {
                    value: value.clone(),
                    taint,
                },
            );
        }

        self.cache.stats.evaluations += 1;
        self.cache.emit(|| CacheEvent::EndEvaluate {
            loc,
            value: value.clone(),
            cached,
        });

        Finished { value, taint }
    }
}
