// Evaluation cache settings
// Loaded from a JSON file; `//` comment lines are allowed.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::SettingsError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSettings {
    /// Visit each invalidation level in location order so traces are reproducible
    #[serde(rename = "calc.sortDependents")]
    pub sort_dependents: bool,

    /// Attach a `LogListener` when no other listener is attached
    #[serde(rename = "calc.logEvents")]
    pub log_events: bool,

    /// Pre-size the store for this many entries
    #[serde(rename = "calc.initialCapacity")]
    pub initial_capacity: usize,

    /// Formula inputs evaluated by nested calls before falling back to the
    /// explicit work stack
    #[serde(rename = "calc.inlineDepth")]
    pub inline_depth: usize,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            sort_dependents: true,
            log_events: false,
            initial_capacity: 0,
            inline_depth: 32,
        }
    }
}

impl EvalSettings {
    /// Parse settings JSON. Lines starting with `//` are ignored; missing keys
    /// take their defaults.
    pub fn from_json_str(contents: &str) -> Result<Self, SettingsError> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(serde_json::from_str(&cleaned)?)
    }

    /// Read and parse a settings file.
    pub fn read(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Load settings from disk, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::read(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{} ({}); using default settings", e, path.display());
                Self::default()
            }
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
