//! Generic session container.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use super::problem_type::{InvalidationPolicy, ProblemType};
use super::types::{ExportRecord, LogEntry, SessionMetadata};

/// Mutable session state for one planning problem.
///
/// - one current output; steps that recompute it replace it,
/// - input is embedded and validated on set,
/// - configuration changes follow [`ProblemType::on_config_change`],
/// - every export is kept with its timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "P: ProblemType")]
pub struct PlanningSession<P: ProblemType> {
    pub metadata: SessionMetadata,
    pub config: P::Config,
    input: Option<P::Input>,
    pub state: P::State,
    output: Option<P::Output>,
    pub exports: Vec<ExportRecord<P::Export>>,
    pub log: Vec<LogEntry>,
}

impl<P: ProblemType> PlanningSession<P> {
    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────

    pub fn new() -> Self {
        Self {
            metadata: SessionMetadata::new(P::name(), P::schema_version()),
            config: P::Config::default(),
            input: None,
            state: P::State::default(),
            output: None,
            exports: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn with_description(description: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.metadata.description = Some(description.into());
        session
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and store input, then apply [`ProblemType::on_input_change`].
    pub fn set_input(&mut self, input: P::Input) -> Result<()> {
        P::validate_input(&input)?;
        self.apply(P::on_input_change());
        self.input = Some(input);
        self.metadata.touch();
        Ok(())
    }

    pub fn input(&self) -> Option<&P::Input> {
        self.input.as_ref()
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn require_input(&self) -> Result<&P::Input> {
        self.input.as_ref().ok_or_else(|| anyhow!("input not set"))
    }

    /// Mutable access without invalidation; callers own the consequences.
    pub fn require_input_mut(&mut self) -> Result<&mut P::Input> {
        self.input.as_mut().ok_or_else(|| anyhow!("input not set"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_config(&mut self, config: P::Config) -> Result<()> {
        P::validate_config(&config)?;
        self.apply(P::on_config_change());
        self.config = config;
        self.metadata.touch();
        Ok(())
    }

    /// Edit a copy of the config and store it if it validates.
    pub fn update_config<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut P::Config),
    {
        let mut config = self.config.clone();
        f(&mut config);
        self.set_config(config)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Output
    // ─────────────────────────────────────────────────────────────────────────

    pub fn output(&self) -> Option<&P::Output> {
        self.output.as_ref()
    }

    pub fn output_mut(&mut self) -> Option<&mut P::Output> {
        self.output.as_mut()
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn require_output(&self) -> Result<&P::Output> {
        self.output.as_ref().ok_or_else(|| anyhow!("output not computed"))
    }

    pub fn require_output_mut(&mut self) -> Result<&mut P::Output> {
        self.output.as_mut().ok_or_else(|| anyhow!("output not computed"))
    }

    /// Store a new output and return the one it replaces.
    pub fn set_output(&mut self, output: P::Output) -> Option<P::Output> {
        self.metadata.touch();
        self.output.replace(output)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Export
    // ─────────────────────────────────────────────────────────────────────────

    /// Export the current output and keep a record of it.
    pub fn export(&mut self, notes: Option<String>) -> Result<P::Export> {
        let export = self.export_peek()?;
        self.exports.push(ExportRecord::new(export.clone(), notes));
        self.metadata.touch();
        Ok(export)
    }

    /// Export without recording.
    pub fn export_peek(&self) -> Result<P::Export> {
        P::export(self.require_output()?, &self.config)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation and log
    // ─────────────────────────────────────────────────────────────────────────

    /// Input present and valid, config valid, and both compatible.
    pub fn validate(&self) -> Result<()> {
        let input = self.require_input()?;
        P::validate_input(input)?;
        P::validate_config(&self.config)?;
        P::validate_input_config(input, &self.config)
    }

    pub fn log_success(&mut self, operation: impl Into<String>) {
        self.push_log(LogEntry::success(operation));
    }

    pub fn log_success_with_notes(
        &mut self,
        operation: impl Into<String>,
        notes: impl Into<String>,
    ) {
        self.push_log(LogEntry::success_with_notes(operation, notes));
    }

    pub fn log_failure(&mut self, operation: impl Into<String>, error: impl Into<String>) {
        self.push_log(LogEntry::failure(operation, error));
    }

    fn push_log(&mut self, entry: LogEntry) {
        self.log.push(entry);
        self.metadata.touch();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reset and persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop everything except config and metadata.
    pub fn reset(&mut self) {
        self.input = None;
        self.apply(InvalidationPolicy::CLEAR_ALL);
        self.log.clear();
        self.metadata.touch();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a session, refusing other problem types and newer schemas.
    pub fn from_json(json: &str) -> Result<Self> {
        let session: Self = serde_json::from_str(json)?;
        if session.metadata.problem_type != P::name() {
            bail!(
                "session is for problem '{}', expected '{}'",
                session.metadata.problem_type,
                P::name()
            );
        }
        if session.metadata.schema_version > P::schema_version() {
            bail!(
                "session schema version {} is newer than supported version {}",
                session.metadata.schema_version,
                P::schema_version()
            );
        }
        Ok(session)
    }

    fn apply(&mut self, policy: InvalidationPolicy) {
        if policy.clear_state {
            self.state = P::State::default();
        }
        if policy.clear_output {
            self.output = None;
        }
        if policy.clear_exports {
            self.exports.clear();
        }
    }
}

impl<P: ProblemType> Default for PlanningSession<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::ensure;

    // ─────────────────────────────────────────────────────────────────────────
    // A counting problem: input is a list of doses, output their total.
    // ─────────────────────────────────────────────────────────────────────────

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct DoseConfig {
        limit: f64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct DoseState {
        partial: Option<f64>,
    }

    #[derive(Debug)]
    struct DoseProblem;

    impl ProblemType for DoseProblem {
        type Config = DoseConfig;
        type Input = Vec<f64>;
        type State = DoseState;
        type Output = f64;
        type Export = String;

        fn name() -> &'static str {
            "dose_total"
        }

        fn schema_version() -> u32 {
            2
        }

        fn validate_input(input: &Self::Input) -> Result<()> {
            ensure!(!input.is_empty(), "no doses");
            Ok(())
        }

        fn validate_config(config: &Self::Config) -> Result<()> {
            ensure!(config.limit >= 0.0, "negative limit");
            Ok(())
        }

        fn export(output: &Self::Output, config: &Self::Config) -> Result<Self::Export> {
            ensure!(*output <= config.limit, "total {output} over limit");
            Ok(format!("{output:.1}"))
        }
    }

    fn session() -> PlanningSession<DoseProblem> {
        let mut s = PlanningSession::<DoseProblem>::with_description("doses");
        s.set_config(DoseConfig { limit: 10.0 }).unwrap();
        s.set_input(vec![1.0, 2.0]).unwrap();
        s
    }

    #[test]
    fn input_is_validated_and_clears_computed() {
        let mut s = session();
        assert!(s.set_input(vec![]).is_err());
        assert_eq!(s.require_input().unwrap().len(), 2);

        s.state.partial = Some(3.0);
        s.set_output(3.0);
        s.export(None).unwrap();
        s.set_input(vec![4.0]).unwrap();
        assert!(s.state.partial.is_none());
        assert!(!s.has_output());
        assert_eq!(s.exports.len(), 1);
    }

    #[test]
    fn config_changes_keep_results() {
        let mut s = session();
        s.set_output(3.0);
        assert!(s.update_config(|c| c.limit = -1.0).is_err());
        assert_eq!(s.config.limit, 10.0);
        s.update_config(|c| c.limit = 2.0).unwrap();
        assert!(s.has_output());
        // The export hook may refuse.
        assert!(s.export(None).is_err());
        assert!(s.exports.is_empty());
    }

    #[test]
    fn set_output_returns_previous() {
        let mut s = session();
        assert_eq!(s.set_output(1.0), None);
        assert_eq!(s.set_output(2.0), Some(1.0));
        assert_eq!(s.export_peek().unwrap(), "2.0");
        assert!(s.exports.is_empty());
    }

    #[test]
    fn json_round_trip_and_schema_guard() {
        let mut s = session();
        s.set_output(3.0);
        s.log_success_with_notes("sum", "2 doses");
        let json = s.to_json().unwrap();
        let back = PlanningSession::<DoseProblem>::from_json(&json).unwrap();
        assert_eq!(back.output(), Some(&3.0));
        assert_eq!(back.log, s.log);
        assert_eq!(back.metadata.description.as_deref(), Some("doses"));

        let newer = json.replace("\"schema_version\": 2", "\"schema_version\": 3");
        assert!(PlanningSession::<DoseProblem>::from_json(&newer).is_err());
        let other = json.replace("dose_total", "something_else");
        assert!(PlanningSession::<DoseProblem>::from_json(&other).is_err());
    }

    #[test]
    fn reset_keeps_config() {
        let mut s = session();
        s.set_output(3.0);
        s.log_failure("sum", "boom");
        s.reset();
        assert!(!s.has_input() && !s.has_output());
        assert!(s.log.is_empty());
        assert_eq!(s.config.limit, 10.0);
        assert!(s.validate().is_err());
    }
}
