//! Workflow configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Settings shared by every run of a [`Workflow`](crate::Workflow).
///
/// All fields have defaults, so a partial JSON document is valid:
///
/// ```rust
/// use llm_flow::WorkflowConfig;
///
/// let config = WorkflowConfig::from_json_str(r#"{ "name": "research", "max_events": 500 }"#).unwrap();
/// assert_eq!(config.name, "research");
/// assert_eq!(config.max_events, Some(500));
/// assert!(config.trace);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Human-readable name used in logs and traces.
    pub name: String,
    /// Fail the run once more than this many events have been dispatched.
    ///
    /// `None` (the default) means a run may dispatch events forever.
    pub max_events: Option<usize>,
    /// Record a structured [`TraceEntry`](crate::TraceEntry) log for each run.
    pub trace: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: "workflow".to_string(),
            max_events: None,
            trace: true,
        }
    }
}

impl WorkflowConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("workflow name must not be empty".to_string()));
        }
        if self.max_events == Some(0) {
            return Err(Error::Config("max_events must be greater than zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = WorkflowConfig::from_json_str("{}").unwrap();
        assert_eq!(config, WorkflowConfig::default());
    }

    #[test]
    fn test_zero_event_limit_rejected() {
        let err = WorkflowConfig::from_json_str(r#"{ "max_events": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_blank_name_rejected() {
        let err = WorkflowConfig::from_json_str(r#"{ "name": "  " }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = WorkflowConfig::from_json_str("{ name: ").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
