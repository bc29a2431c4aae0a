//! Solver configuration. All running instances within one fit share the
//! same configuration; it is plain data and cheap to clone.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tuning knobs for the optimization.
///
/// The JSON field names follow the external convention used by callers, so
/// `upperbound_guess` serializes as `"upperbound"` and `reference_lb` keeps
/// its historical `"reference_LB"` spelling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Configuration {
    /// Penalty incurred for each leaf in the model.
    pub regularization: f32,

    /// Upper bound on the root objective produced by an external greedy
    /// model. 0 disables the seed.
    #[serde(rename = "upperbound")]
    pub upperbound_guess: f32,

    /// Maximum allowed runtime in seconds. 0 means unlimited.
    pub time_limit: u32,

    /// Number of worker threads.
    pub worker_limit: u32,

    /// Maximum number of models extracted.
    pub model_limit: u32,

    /// Print progress to the log on every tick.
    pub verbose: bool,

    /// Emit extra diagnostic logging when a bug is detected.
    pub diagnostics: bool,

    /// Maximum tree depth, counting a lone leaf as depth 1. 0 means
    /// unlimited.
    pub depth_budget: u8,

    /// Use reference-model misclassifications to lower bound our own.
    #[serde(rename = "reference_LB")]
    pub reference_lb: bool,

    /// One-step look-ahead bound implemented via scopes.
    pub look_ahead: bool,

    /// Similar-support bound implemented via the pairwise distance index.
    pub similar_support: bool,

    /// Upward propagation of cancelled subproblems.
    pub cancellation: bool,

    /// Equivalence discovery through simple feature transformations.
    pub feature_transform: bool,

    /// Constrain models to rule lists (each split keeps one side a leaf).
    pub rule_list: bool,

    /// Accept non-binary encodings.
    pub non_binary: bool,

    /// Directory used to store traces. Unused by the solver.
    pub trace: String,

    /// Directory used to store tree traces. Not supported; a warning is
    /// logged when set.
    pub tree: String,

    /// File receiving the per-tick runtime profile as CSV.
    pub profile: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            regularization: 0.05,
            upperbound_guess: 0.0,
            time_limit: 0,
            worker_limit: 1,
            model_limit: 1,
            verbose: false,
            diagnostics: false,
            depth_budget: 0,
            reference_lb: false,
            look_ahead: true,
            similar_support: true,
            cancellation: true,
            feature_transform: true,
            rule_list: false,
            non_binary: false,
            trace: String::new(),
            tree: String::new(),
            profile: String::new(),
        }
    }
}

impl Configuration {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// True when a depth constraint is in force.
    #[inline(always)]
    pub fn uses_depth_budget(&self) -> bool {
        self.depth_budget != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_is_identity() {
        let mut config = Configuration::default();
        config.regularization = 0.01;
        config.upperbound_guess = 0.3;
        config.time_limit = 60;
        config.worker_limit = 4;
        config.depth_budget = 5;
        config.reference_lb = true;
        config.rule_list = true;
        config.profile = "profile.csv".to_string();

        let text = config.to_json().unwrap();
        let back = Configuration::from_json(&text).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn external_field_names_are_respected() {
        let text = r#"{"regularization": 0.02, "upperbound": 0.5, "reference_LB": true}"#;
        let config = Configuration::from_json(text).unwrap();
        assert_eq!(config.regularization, 0.02);
        assert_eq!(config.upperbound_guess, 0.5);
        assert!(config.reference_lb);
        // Unspecified fields fall back to the defaults.
        assert!(config.look_ahead);
        assert_eq!(config.worker_limit, 1);
    }
}
