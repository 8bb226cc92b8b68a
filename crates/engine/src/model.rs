//! Interfaces the cache consumes from the document side.
//!
//! The cell model owns cell contents and formula token sequences; the
//! function evaluator turns a token sequence into a value. Neither is
//! implemented here. The evaluator reads every referenced cell through the
//! resolver it is handed, which is how the cache learns a formula's inputs.

use crate::location::Location;
use crate::value::Value;

/// What the document holds at a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Blank,
    Plain,
    Formula,
}

/// Read access to cell contents.
pub trait CellModel {
    /// Parsed operation sequence for a formula cell. Opaque to the cache.
    type Formula;

    fn cell_kind(&self, loc: Location) -> CellKind;

    /// Literal value of a non-formula cell. Only called for `Plain`/`Blank`.
    fn read_plain_value(&self, loc: Location) -> Value;

    /// Operations of a formula cell. `None` if the cell is not a formula.
    fn read_formula(&self, loc: Location) -> Option<Self::Formula>;
}

/// Evaluates an operation sequence.
///
/// `resolve` must be called for every cell the result depends on, including
/// each cell of a range. Cells not resolved in a pass are not recorded as
/// inputs, so a change to them will not invalidate the result.
pub trait FunctionEvaluator<F> {
    fn apply(&self, formula: &F, resolve: &mut dyn FnMut(Location) -> Value) -> Value;
}

impl<M: CellModel + ?Sized> CellModel for &M {
    type Formula = M::Formula;

    fn cell_kind(&self, loc: Location) -> CellKind {
        (**self).cell_kind(loc)
    }

    fn read_plain_value(&self, loc: Location) -> Value {
        (**self).read_plain_value(loc)
    }

    fn read_formula(&self, loc: Location) -> Option<Self::Formula> {
        (**self).read_formula(loc)
    }
}

impl<F, E: FunctionEvaluator<F> + ?Sized> FunctionEvaluator<F> for &E {
    fn apply(&self, formula: &F, resolve: &mut dyn FnMut(Location) -> Value) -> Value {
        (**self).apply(formula, resolve)
    }
}

/// Cells of the rectangle spanned by `a` and `b` (on `a`'s book and sheet),
/// row by row.
pub fn cells_in_range(a: Location, b: Location) -> impl Iterator<Item = Location> {
    let (r0, r1) = (a.row().min(b.row()), a.row().max(b.row()));
    let (c0, c1) = (a.col().min(b.col()), a.col().max(b.col()));
    (r0..=r1).flat_map(move |row| (c0..=c1).map(move |col| a.with_cell(row, col)))
}
