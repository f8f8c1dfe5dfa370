//! The interface a planning problem implements to live in a
//! [`PlanningSession`](super::PlanningSession).

use std::fmt::Debug;

use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};

/// What a session clears when its input or configuration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationPolicy {
    pub clear_state: bool,
    pub clear_output: bool,
    pub clear_exports: bool,
}

impl InvalidationPolicy {
    pub const KEEP_ALL: Self = Self {
        clear_state: false,
        clear_output: false,
        clear_exports: false,
    };

    /// Clears state and output; exports already handed out stay on record.
    pub const CLEAR_COMPUTED: Self = Self {
        clear_state: true,
        clear_output: true,
        clear_exports: false,
    };

    pub const CLEAR_ALL: Self = Self {
        clear_state: true,
        clear_output: true,
        clear_exports: true,
    };
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self::KEEP_ALL
    }
}

/// A planning problem: its configuration, input, intermediate state, output
/// and export types.
///
/// Behaviour lives in step functions over `&mut PlanningSession<Self>`; the
/// trait only carries identity, validation hooks, invalidation policy and
/// the output → export conversion.
pub trait ProblemType: Sized + 'static {
    /// Options controlling the steps. Must have a usable `Default`.
    type Config: Clone + Default + Serialize + DeserializeOwned + Debug;
    /// Embedded input data.
    type Input: Clone + Serialize + DeserializeOwned + Debug;
    /// Intermediate results and bookkeeping.
    type State: Clone + Default + Serialize + DeserializeOwned + Debug;
    /// The single current result.
    type Output: Clone + Serialize + DeserializeOwned + Debug;
    /// What leaves the session.
    type Export: Clone + Serialize + DeserializeOwned + Debug;

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Stable snake_case identifier, stored in session files.
    fn name() -> &'static str;

    /// Sessions with a newer schema version are refused on load.
    fn schema_version() -> u32 {
        1
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation hooks
    // ─────────────────────────────────────────────────────────────────────────

    fn validate_input(_input: &Self::Input) -> Result<()> {
        Ok(())
    }

    fn validate_config(_config: &Self::Config) -> Result<()> {
        Ok(())
    }

    /// Cross-check input and config; called by
    /// [`PlanningSession::validate`](super::PlanningSession::validate).
    fn validate_input_config(_input: &Self::Input, _config: &Self::Config) -> Result<()> {
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invalidation
    // ─────────────────────────────────────────────────────────────────────────

    fn on_input_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn on_config_change() -> InvalidationPolicy {
        InvalidationPolicy::KEEP_ALL
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Export
    // ─────────────────────────────────────────────────────────────────────────

    /// Convert the current output for external consumption. May refuse.
    fn export(output: &Self::Output, config: &Self::Config) -> Result<Self::Export>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_differ_only_where_named() {
        assert_eq!(InvalidationPolicy::default(), InvalidationPolicy::KEEP_ALL);
        let computed = InvalidationPolicy::CLEAR_COMPUTED;
        assert!(computed.clear_state && computed.clear_output && !computed.clear_exports);
        assert!(InvalidationPolicy::CLEAR_ALL.clear_exports);
    }
}
