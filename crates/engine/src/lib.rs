pub mod cache;
pub mod entry;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod invalidate;
pub mod location;
pub mod model;
pub mod settings;
pub mod stats;
pub mod store;
pub mod value;

#[cfg(test)]
pub mod harness;

pub use cache::EvaluationCache;
pub use entry::EntryState;
pub use error::{EvalError, InvariantViolation, LocationError, SettingsError};
pub use evaluator::Evaluator;
pub use events::{CacheEvent, EvaluationListener, EventLog, LogListener};
pub use location::Location;
pub use model::{CellKind, CellModel, FunctionEvaluator};
pub use settings::EvalSettings;
pub use stats::CacheStats;
pub use value::{ErrorCode, Value};
