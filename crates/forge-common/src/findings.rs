//! Quality gate output types.
//!
//! - [`Severity`]: classification for individual findings
//! - [`Finding`]: one rule violation or observation about an artifact
//! - [`QualityVerdict`]: the complete, immutable result of evaluating an artifact
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use forge_common::findings::{Finding, QualityVerdict, Severity};
//!
//! let finding = Finding::new(Severity::Warning, "max_length", "Artifact is long")
//!     .with_location("content");
//! let verdict = QualityVerdict::from_findings(1, vec![finding], Utc::now());
//!
//! assert!(verdict.passed);
//! assert_eq!(verdict.findings.len(), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::JobId;

/// Severity level for findings, ordered from most to least critical.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks completion of the job.
    #[default]
    Error,
    /// Reported to the user, does not block.
    Warning,
    /// Informational observation.
    Info,
}

impl Severity {
    /// Only `Error` findings fail a verdict.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Error)
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Error => "🔴",
            Self::Warning => "🟡",
            Self::Info => "🔵",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// A single finding produced by one quality rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    /// Id of the rule that produced this finding.
    pub rule_id: String,
    pub message: String,
    /// Where in the artifact the problem is (a field name, metadata key, or offset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            rule_id: rule_id.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.severity, self.rule_id, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {})", location)?;
        }
        Ok(())
    }
}

/// Outcome of evaluating one artifact. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub job_id: JobId,
    pub passed: bool,
    pub findings: Vec<Finding>,
    pub evaluated_at: DateTime<Utc>,
}

impl QualityVerdict {
    /// Build a verdict; it passes when no finding is blocking.
    pub fn from_findings(job_id: JobId, findings: Vec<Finding>, evaluated_at: DateTime<Utc>) -> Self {
        let passed = !findings.iter().any(Finding::is_blocking);
        Self {
            job_id,
            passed,
            findings,
            evaluated_at,
        }
    }

    pub fn blocking_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_blocking())
    }

    /// One-line summary, e.g. `FAIL (2 errors, 1 warning)`.
    pub fn summary(&self) -> String {
        let errors = self.findings.iter().filter(|f| f.severity == Severity::Error).count();
        let warnings = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count();
        format!(
            "{} ({} error{}, {} warning{})",
            if self.passed { "PASS" } else { "FAIL" },
            errors,
            if errors == 1 { "" } else { "s" },
            warnings,
            if warnings == 1 { "" } else { "s" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Info);
    }

    #[test]
    fn test_severity_parse_accepts_warn_alias() {
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("ERROR".parse::<Severity>().unwrap(), Severity::Error);
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn test_verdict_passes_without_errors() {
        let findings = vec![
            Finding::new(Severity::Warning, "max_length", "long"),
            Finding::new(Severity::Info, "note", "fyi"),
        ];
        let verdict = QualityVerdict::from_findings(1, findings, at());
        assert!(verdict.passed);
        assert_eq!(verdict.blocking_findings().count(), 0);
        assert_eq!(verdict.summary(), "PASS (0 errors, 1 warning)");
    }

    #[test]
    fn test_verdict_fails_on_error_finding() {
        let findings = vec![Finding::new(Severity::Error, "min_length", "too short")];
        let verdict = QualityVerdict::from_findings(1, findings, at());
        assert!(!verdict.passed);
        assert_eq!(verdict.blocking_findings().count(), 1);
        assert_eq!(verdict.summary(), "FAIL (1 error, 0 warnings)");
    }

    #[test]
    fn test_finding_display_includes_location() {
        let finding = Finding::new(Severity::Error, "required_metadata", "missing key")
            .with_location("metadata.score");
        assert_eq!(
            finding.to_string(),
            "error [required_metadata] missing key (at metadata.score)"
        );
    }
}
