//! Test harness for evaluation cache scenarios.
//!
//! This module provides `SheetHarness`, a wrapper around an `Evaluator` that:
//! - Keeps cell contents in an in-memory `TestSheet`
//! - Parses formulas with a small test formula language
//! - Calls the matching `notify_*` method after every edit
//! - Records every cache event as a trace line
//!
//! Cells are addressed as `"A1"` (sheet 0 of book 0) or `"Sheet2!A1"`.


use rustc_hash::FxHashMap;

use crate::entry::EntryState;
use crate::error::EvalError;
use crate::evaluator::Evaluator;
use crate::events::EventLog;
use crate::location::Location;
use crate::model::{CellKind, CellModel};
use crate::settings::EvalSettings;
use crate::stats::CacheStats;
use crate::value::Value;

use formula::Expr;
use functions::SheetFunctions;

/// Cell contents held by the test sheet.
#[derive(Debug, Clone)]
pub enum TestCell {
    Value(Value),
    Formula { text: String, expr: Expr },
}

/// In-memory cell model. Absent cells are blank.
#[derive(Debug, Default)]
pub struct TestSheet {
    cells: FxHashMap<Location, TestCell>,
}

impl TestSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a literal. Writing `Blank` removes the cell.
    pub fn set_value(&mut self, loc: Location, value: Value) {
        if value.is_blank() {
            self.cells.remove(&loc);
        } else {
            self.cells.insert(loc, TestCell::Value(value));
        }
    }

    /// Parse and store a formula. References resolve onto `loc`'s sheet.
    pub fn set_formula(&mut self, loc: Location, text: &str) -> Result<(), String> {
        let expr = formula::parse(text, loc)?;
        self.cells.insert(
            loc,
            TestCell::Formula {
                text: text.to_string(),
                expr,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, loc: Location) -> Option<TestCell> {
        self.cells.remove(&loc)
    }

    pub fn get(&self, loc: Location) -> Option<&TestCell> {
        self.cells.get(&loc)
    }

    pub fn formula_text(&self, loc: Location) -> Option<&str> {
        match self.cells.get(&loc) {
            Some(TestCell::Formula { text, .. }) => Some(text),
            _ => None,
        }
    }
}

impl CellModel for TestSheet {
    type Formula = Expr;

    fn cell_kind(&self, loc: Location) -> CellKind {
        match self.cells.get(&loc) {
            None => CellKind::Blank,
            Some(TestCell::Value(_)) => CellKind::Plain,
            Some(TestCell::Formula { .. }) => CellKind::Formula,
        }
    }

    fn read_plain_value(&self, loc: Location) -> Value {
        match self.cells.get(&loc) {
            Some(TestCell::Value(v)) => v.clone(),
            _ => Value::Blank,
        }
    }

    fn read_formula(&self, loc: Location) -> Option<Expr> {
        match self.cells.get(&loc) {
            Some(TestCell::Formula { expr, .. }) => Some(expr.clone()),
            _ => None,
        }
    }
}

/// Edit to apply to the harness sheet.
#[derive(Debug, Clone)]
pub enum Edit {
    /// Set a literal value (`Blank` clears the cell's content).
    SetValue { cell: String, value: Value },
    /// Set a formula (text starting with `=`).
    SetFormula { cell: String, formula: String },
    /// Delete the cell.
    Delete { cell: String },
}

/// Resolve `"A1"` or `"SheetN!A1"` in book 0.
pub fn loc(text: &str) -> Location {
    let (sheet, a1) = match text.split_once('!') {
        Some((name, a1)) => {
            let index: u32 = name
                .strip_prefix("Sheet")
                .and_then(|n| n.parse().ok())
                .unwrap_or_else(|| panic!("bad sheet name in {text}"));
            (index - 1, a1)
        }
        None => (0, text),
    };
    Location::parse_a1(0, sheet, a1).unwrap_or_else(|e| panic!("{e}"))
}

/// Test harness wrapping an `Evaluator` over a `TestSheet`, with event tracking.
pub struct SheetHarness {
    evaluator: Evaluator<TestSheet, SheetFunctions>,
    events: EventLog,
}

impl SheetHarness {
    /// Create a new harness with an empty sheet and default settings.
    pub fn new() -> Self {
        Self::with_settings(EvalSettings::default())
    }

    pub fn with_settings(settings: EvalSettings) -> Self {
        let mut evaluator = Evaluator::with_settings(TestSheet::new(), SheetFunctions, settings);
        let events = EventLog::new();
        evaluator.attach_listener(Box::new(events.clone()));
        Self { evaluator, events }
    }

    pub fn evaluator(&self) -> &Evaluator<TestSheet, SheetFunctions> {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut Evaluator<TestSheet, SheetFunctions> {
        &mut self.evaluator
    }

    /// Set a literal value and notify the cache.
    pub fn set_value(&mut self, cell: &str, value: impl Into<Value>) {
        let at = loc(cell);
        let value = value.into();
        self.evaluator.model_mut().set_value(at, value.clone());
        self.evaluator.notify_plain_value_changed(at, value);
    }

    /// Set a formula and notify the cache. Panics if the formula does not parse.
    pub fn set_formula(&mut self, cell: &str, formula: &str) {
        let at = loc(cell);
        if let Err(e) = self.evaluator.model_mut().set_formula(at, formula) {
            panic!("cannot parse {formula} for {cell}: {e}");
        }
        self.evaluator.notify_formula_changed(at);
    }

    /// Delete a cell and notify the cache.
    pub fn delete(&mut self, cell: &str) {
        let at = loc(cell);
        self.evaluator.model_mut().remove(at);
        self.evaluator.notify_cell_deleted(at);
    }

    /// Apply edits in order, checking edge consistency after each one.
    pub fn apply_edits(&mut self, edits: &[Edit]) {
        for edit in edits {
            match edit {
                Edit::SetValue { cell, value } => self.set_value(cell, value.clone()),
                Edit::SetFormula { cell, formula } => self.set_formula(cell, formula),
                Edit::Delete { cell } => self.delete(cell),
            }
            self.assert_consistent();
        }
    }

    pub fn try_evaluate(&mut self, cell: &str) -> Result<Value, EvalError> {
        self.evaluator.evaluate(loc(cell))
    }

    /// Evaluate a cell. Panics on a structural error.
    pub fn evaluate(&mut self, cell: &str) -> Value {
        match self.try_evaluate(cell) {
            Ok(value) => value,
            Err(e) => panic!("evaluating {cell} failed: {e}"),
        }
    }

    pub fn evaluate_number(&mut self, cell: &str) -> f64 {
        match self.evaluate(cell) {
            Value::Number(n) => n,
            other => panic!("{cell} evaluated to {other}, expected a number"),
        }
    }

    pub fn clear_all(&mut self) {
        self.evaluator.clear_all();
    }

    /// Drain recorded events as trace lines.
    pub fn take_trace(&self) -> Vec<String> {
        self.events.take_trace()
    }

    /// Clear collected events.
    pub fn clear_events(&self) {
        self.events.clear();
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn state(&self, cell: &str) -> Option<EntryState> {
        self.evaluator.cache().entry_state(loc(cell))
    }

    /// Inputs of a formula entry as A1 strings, sorted by location.
    pub fn inputs(&self, cell: &str) -> Vec<String> {
        self.evaluator.cache().inputs(loc(cell)).into_iter().map(Location::a1).collect()
    }

    /// Consumers of an entry as A1 strings, sorted by location.
    pub fn consumers(&self, cell: &str) -> Vec<String> {
        self.evaluator.cache().consumers(loc(cell)).into_iter().map(Location::a1).collect()
    }

    pub fn stats(&self) -> &CacheStats {
        self.evaluator.cache().stats()
    }

    pub fn assert_consistent(&self) {
        if let Err(e) = self.evaluator.cache().check_consistency() {
            panic!("cache inconsistent: {e}");
        }
    }
}

impl Default for SheetHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_set_and_evaluate() {
        let mut h = SheetHarness::new();
        h.set_value("B1", 2.0);
        h.set_formula("A1", "=B1*21");

        assert_eq!(h.take_trace(), vec!["changeFromBlank B1 2", "changeFromBlank A1"]);
        assert_eq!(h.evaluate_number("A1"), 42.0);
        assert_eq!(h.take_trace(), vec!["start A1", "hit B1 2", "end A1 42"]);
        assert_eq!(h.inputs("A1"), vec!["B1"]);
        assert_eq!(h.consumers("B1"), vec!["A1"]);
    }

    #[test]
    fn test_harness_apply_edits() {
        let mut h = SheetHarness::new();
        h.apply_edits(&[
            Edit::SetValue { cell: "B1".into(), value: Value::Number(1.0) },
            Edit::SetFormula { cell: "A1".into(), formula: "=B1+1".into() },
            Edit::Delete { cell: "B1".into() },
        ]);
        assert_eq!(h.evaluate_number("A1"), 1.0);
        h.assert_consistent();
    }

    #[test]
    fn test_loc_parsing() {
        assert_eq!(loc("C2"), Location::on_sheet(0, 1, 2));
        assert_eq!(loc("Sheet3!A1"), Location::on_sheet(2, 0, 0));
    }

    #[test]
    fn test_test_sheet_model() {
        let mut sheet = TestSheet::new();
        let a1 = loc("A1");
        assert_eq!(sheet.cell_kind(a1), CellKind::Blank);

        sheet.set_value(a1, Value::from("x"));
        assert_eq!(sheet.cell_kind(a1), CellKind::Plain);
        assert_eq!(sheet.read_plain_value(a1), Value::from("x"));
        assert!(sheet.read_formula(a1).is_none());

        sheet.set_formula(a1, "=1+1").unwrap();
        assert_eq!(sheet.cell_kind(a1), CellKind::Formula);
        assert_eq!(sheet.formula_text(a1), Some("=1+1"));
        assert!(sheet.read_formula(a1).is_some());

        sheet.set_value(a1, Value::Blank);
        assert!(sheet.get(a1).is_none());
    }
}
