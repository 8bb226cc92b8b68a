//! Error types.
//!
//! Data errors (`#REF!`, circular references, ...) are not here: they are
//! [`Value::Error`](crate::value::Value) and flow through evaluation results.
//! These types cover structural failures that abort an operation.

use thiserror::Error;

use crate::location::Location;

/// Evaluation aborted; the cache has been restored to a usable state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The cell model reported a formula cell but produced no operations for it.
    #[error("cell {0} is a formula cell but the model returned no formula")]
    MissingFormula(Location),

    /// An entry was already mid-evaluation when a fresh evaluation reached it.
    #[error("cell {0} is already being evaluated")]
    Reentrant(Location),
}

/// The consumer/input edge sets disagree. Never recoverable: any further
/// invalidation through the affected entries would be wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{input} has no entry but is an input of {consumer}")]
    MissingInput { consumer: Location, input: Location },

    #[error("{consumer} reads {input} but is not in its consumer set")]
    MissingConsumerEdge { consumer: Location, input: Location },

    #[error("{input} lists {consumer} as consumer but {consumer} does not read it")]
    MissingInputEdge { consumer: Location, input: Location },

    #[error("{input} lists {consumer} as consumer but {consumer} is not a formula entry")]
    ConsumerNotFormula { consumer: Location, input: Location },

    #[error("{0} is still marked as evaluating")]
    StuckEvaluating(Location),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location out of range: book={book} sheet={sheet} row={row} col={col}")]
    OutOfRange { book: u32, sheet: u32, row: u32, col: u32 },

    #[error("invalid cell reference: {0:?}")]
    BadReference(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
