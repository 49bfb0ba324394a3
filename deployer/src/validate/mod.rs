//! Validation pipeline
//!
//! Two ordered gates of named checks: the pre-deployment gate runs before
//! any mutation, the post-deployment gate runs after the file deployer and
//! triggers rollback on failure.

pub mod post;
pub mod pre;

use std::time::Instant;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};

/// Outcome status of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Skip,
}

/// One check outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub check_name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ValidationResult {
    fn new(check_name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            check_name: check_name.to_string(),
            status,
            message: message.into(),
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn pass(check_name: &str, message: impl Into<String>) -> Self {
        Self::new(check_name, CheckStatus::Pass, message)
    }

    pub fn fail(check_name: &str, message: impl Into<String>) -> Self {
        Self::new(check_name, CheckStatus::Fail, message)
    }

    pub fn warn(check_name: &str, message: impl Into<String>) -> Self {
        Self::new(check_name, CheckStatus::Warn, message)
    }

    pub fn skip(check_name: &str, message: impl Into<String>) -> Self {
        Self::new(check_name, CheckStatus::Skip, message)
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Record the elapsed time since `started`
    pub fn timed(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// Ordered collection of check outcomes for one gate
#[derive(Debug, Clone, Default)]
pub struct GateReport {
    pub results: Vec<ValidationResult>,
}

impl GateReport {
    pub fn push(&mut self, result: ValidationResult) {
        self.results.push(result);
    }

    pub fn has_failures(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.status == CheckStatus::Fail)
    }

    pub fn failures(&self) -> Vec<&ValidationResult> {
        self.results
            .iter()
            .filter(|r| r.status == CheckStatus::Fail)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationResult> {
        self.results
            .iter()
            .filter(|r| r.status == CheckStatus::Warn)
            .collect()
    }

    /// Print one line per check for the operator
    pub fn print(&self) {
        for result in &self.results {
            let tag = match result.status {
                CheckStatus::Pass => "PASS".green(),
                CheckStatus::Fail => "FAIL".red(),
                CheckStatus::Warn => "WARN".yellow(),
                CheckStatus::Skip => "SKIP".dimmed(),
            };
            println!("  [{}] {}: {}", tag, result.check_name, result.message);
        }
    }

    /// Summarize failed checks in one line
    pub fn failure_summary(&self) -> String {
        self.failures()
            .iter()
            .map(|r| format!("{}: {}", r.check_name, r.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
