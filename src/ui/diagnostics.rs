use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::AppError;

const MAX_ISSUES: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderIssue {
    pub panel: String,
    pub message: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrences: u64,
}

/// Render failures seen during the session. Repeats of the same failure are folded together.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    issues: VecDeque<RenderIssue>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, error: &AppError) {
        let (panel, message) = match error {
            AppError::Render { panel, message } => (panel.clone(), message.clone()),
            other => ("general".to_string(), other.to_string()),
        };
        let now = Utc::now();

        if let Some(issue) = self.issues.iter_mut().find(|i| i.panel == panel && i.message == message) {
            issue.last_seen = now;
            issue.occurrences += 1;
            return;
        }

        if self.issues.len() == MAX_ISSUES {
            self.issues.pop_front();
        }
        self.issues.push_back(RenderIssue {
            panel,
            message,
            first_seen: now,
            last_seen: now,
            occurrences: 1,
        });
    }

    pub fn record_all(&mut self, errors: &[AppError]) {
        for error in errors {
            self.record(error);
        }
    }

    pub fn issues(&self) -> impl Iterator<Item = &RenderIssue> {
        self.issues.iter()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub app_version: String,
    pub operating_mode: String,
    pub address: String,
    pub connection_state: String,
    pub position_count: usize,
    pub alert_count: usize,
    pub last_error: Option<String>,
    pub render_issues: Vec<RenderIssue>,
}

impl DiagnosticReport {
    pub fn new(
        log: &DiagnosticLog,
        operating_mode: &str,
        address: &str,
        connection_state: &str,
        position_count: usize,
        alert_count: usize,
        last_error: Option<String>,
    ) -> Self {
        Self {
            report_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            operating_mode: operating_mode.to_string(),
            address: address.to_string(),
            connection_state: connection_state.to_string(),
            position_count,
            alert_count,
            last_error,
            render_issues: log.issues().cloned().collect(),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "lp-sentinel-diagnostics-{}.json",
            self.generated_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    /// Writes the report as pretty JSON into `dir` and returns the file path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_failures_are_folded() {
        let mut log = DiagnosticLog::new();
        let err = AppError::render("positions", "non-finite score");
        log.record(&err);
        log.record(&err);
        log.record(&AppError::render("alerts", "bad timestamp"));

        assert_eq!(log.len(), 2);
        let first = log.issues().next().unwrap();
        assert_eq!(first.panel, "positions");
        assert_eq!(first.occurrences, 2);
    }

    #[test]
    fn non_render_errors_go_to_general() {
        let mut log = DiagnosticLog::new();
        log.record(&AppError::Network("timeout".into()));
        assert_eq!(log.issues().next().unwrap().panel, "general");
    }

    #[test]
    fn log_is_bounded() {
        let mut log = DiagnosticLog::new();
        for i in 0..(MAX_ISSUES + 5) {
            log.record(&AppError::render("markets", format!("issue {}", i)));
        }
        assert_eq!(log.len(), MAX_ISSUES);
        assert_eq!(log.issues().next().unwrap().message, "issue 5");
    }

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = DiagnosticLog::new();
        log.record(&AppError::render("header", "boom"));

        let report = DiagnosticReport::new(&log, "Demo", "vitalik.eth", "Connected", 5, 2, None);
        let path = report.write_to(dir.path()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let parsed: DiagnosticReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.report_id, report.report_id);
        assert_eq!(parsed.render_issues.len(), 1);
        assert_eq!(parsed.position_count, 5);
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("lp-sentinel-diagnostics-"));
    }
}
