//! Session bookkeeping: metadata, audit log entries and export records.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// From [`ProblemType::name`](super::ProblemType::name).
    pub problem_type: String,
    pub schema_version: u32,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    pub last_modified: u64,
    #[serde(default)]
    pub description: Option<String>,
}

impl SessionMetadata {
    pub fn new(problem_type: impl Into<String>, schema_version: u32) -> Self {
        let now = current_timestamp();
        Self {
            problem_type: problem_type.into(),
            schema_version,
            created_at: now,
            last_modified: now,
            description: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_modified = current_timestamp();
    }
}

/// One audited operation. Not a replay log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: u64,
    /// Step name, e.g. `"virtual_fit"`, `"approve_solution"`.
    pub operation: String,
    pub success: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl LogEntry {
    pub fn success(operation: impl Into<String>) -> Self {
        Self::entry(operation, true, None)
    }

    pub fn success_with_notes(operation: impl Into<String>, notes: impl Into<String>) -> Self {
        Self::entry(operation, true, Some(notes.into()))
    }

    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self::entry(operation, false, Some(error.into()))
    }

    fn entry(operation: impl Into<String>, success: bool, notes: Option<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success,
            notes,
        }
    }
}

/// An export together with when it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord<E> {
    pub timestamp: u64,
    pub export: E,
    #[serde(default)]
    pub notes: Option<String>,
}

impl<E> ExportRecord<E> {
    pub fn new(export: E, notes: Option<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            export,
            notes,
        }
    }
}

/// Seconds since the Unix epoch; 0 if the clock is before it.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_starts_unmodified() {
        let meta = SessionMetadata::new("treatment_planning", 1);
        assert_eq!(meta.problem_type, "treatment_planning");
        assert!(meta.created_at > 0);
        assert_eq!(meta.created_at, meta.last_modified);
    }

    #[test]
    fn log_entries_carry_outcome() {
        let ok = LogEntry::success_with_notes("plan", "5 points");
        assert!(ok.success);
        assert_eq!(ok.notes.as_deref(), Some("5 points"));
        let bad = LogEntry::failure("approve_solution", "stale pose");
        assert!(!bad.success);
        assert_eq!(bad.operation, "approve_solution");
    }

    #[test]
    fn export_record_json() {
        let record = ExportRecord::new(vec![0.0, 1.5e-6], Some("handoff".into()));
        let json = serde_json::to_string(&record).unwrap();
        let back: ExportRecord<Vec<f64>> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
