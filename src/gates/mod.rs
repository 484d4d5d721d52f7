//! Quality gate applied to provider artifacts before a job may complete.
//!
//! Evaluation is a pure function of the artifact, the rule set and the
//! timestamp handed in by the caller, so replaying an artifact always yields
//! the same verdict.

pub mod rules;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use forge_common::{Artifact, ForgeError, ForgeResult, JobId, QualityVerdict};

pub use rules::{Rule, RuleConfig, RuleKind};

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    /// Enabled rules, sorted by id.
    rules: Vec<Rule>,
}

impl QualityGate {
    /// A gate without rules; it only checks artifact structure.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Build a gate from the configured rule tables. Disabled rules are
    /// dropped here; invalid ones fail with `Config`.
    pub fn from_config(rules: &BTreeMap<String, RuleConfig>) -> ForgeResult<Self> {
        let rules = rules
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(id, config)| Rule::compile(id, config))
            .collect::<ForgeResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Evaluate an artifact.
    ///
    /// Returns `InvalidArtifact` only when the artifact cannot be evaluated at
    /// all (missing name or media type). Quality problems come back as
    /// findings on a verdict; the verdict fails if any finding is an error.
    pub fn evaluate(
        &self,
        job_id: JobId,
        artifact: &Artifact,
        evaluated_at: DateTime<Utc>,
    ) -> ForgeResult<QualityVerdict> {
        validate_structure(artifact)?;

        let findings = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(artifact))
            .collect();

        Ok(QualityVerdict::from_findings(job_id, findings, evaluated_at))
    }
}

fn validate_structure(artifact: &Artifact) -> ForgeResult<()> {
    if artifact.name.trim().is_empty() {
        return Err(ForgeError::InvalidArtifact("artifact has no name".into()));
    }
    if artifact.media_type.trim().is_empty() {
        return Err(ForgeError::InvalidArtifact(format!(
            "artifact '{}' has no media type",
            artifact.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use forge_common::Severity;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn gate() -> QualityGate {
        let mut rules = BTreeMap::new();
        rules.insert(
            "b-length".to_string(),
            RuleConfig::new(RuleKind::MinLength { min: 20 }),
        );
        rules.insert(
            "a-placeholders".to_string(),
            RuleConfig::new(RuleKind::ForbiddenTerms {
                terms: vec!["TODO".into()],
            })
            .with_severity(Severity::Warning),
        );
        rules.insert(
            "c-score".to_string(),
            RuleConfig::new(RuleKind::MetadataMin {
                key: "score".into(),
                min: 0.5,
            })
            .disabled(),
        );
        QualityGate::from_config(&rules).unwrap()
    }

    #[test]
    fn test_disabled_rules_are_dropped() {
        let gate = gate();
        let ids: Vec<_> = gate.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a-placeholders", "b-length"]);
    }

    #[test]
    fn test_passing_artifact() {
        let artifact = Artifact::new("doc", "text/markdown", "A sufficiently long document body.");
        let verdict = gate().evaluate(1, &artifact, at()).unwrap();
        assert!(verdict.passed);
        assert!(verdict.findings.is_empty());
        assert_eq!(verdict.job_id, 1);
        assert_eq!(verdict.evaluated_at, at());
    }

    #[test]
    fn test_warning_does_not_block() {
        let artifact = Artifact::new("doc", "text/markdown", "TODO: a long enough document body");
        let verdict = gate().evaluate(1, &artifact, at()).unwrap();
        assert!(verdict.passed);
        assert_eq!(verdict.findings.len(), 1);
        assert_eq!(verdict.findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_findings_follow_rule_order() {
        let artifact = Artifact::new("doc", "text/markdown", "TODO");
        let verdict = gate().evaluate(1, &artifact, at()).unwrap();
        assert!(!verdict.passed);
        let ids: Vec<_> = verdict.findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["a-placeholders", "b-length"]);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let gate = gate();
        let artifact = Artifact::new("doc", "text/markdown", "TODO short");
        let first = gate.evaluate(4, &artifact, at()).unwrap();
        let second = gate.evaluate(4, &artifact, at()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_structurally_invalid_artifacts() {
        let gate = QualityGate::permissive();
        let no_name = Artifact::new("  ", "text/plain", "body");
        assert!(matches!(
            gate.evaluate(1, &no_name, at()),
            Err(ForgeError::InvalidArtifact(_))
        ));
        let no_type = Artifact::new("doc", "", "body");
        let err = gate.evaluate(1, &no_type, at()).unwrap_err();
        assert!(err.to_string().contains("no media type"));
    }

    #[test]
    fn test_permissive_gate_passes_empty_content() {
        let verdict = QualityGate::permissive()
            .evaluate(1, &Artifact::new("doc", "text/plain", ""), at())
            .unwrap();
        assert!(verdict.passed);
    }

    #[test]
    fn test_invalid_rule_fails_gate_construction() {
        let mut rules = BTreeMap::new();
        rules.insert(
            "broken".to_string(),
            RuleConfig::new(RuleKind::ForbiddenPattern {
                pattern: "[".into(),
            }),
        );
        assert!(QualityGate::from_config(&rules).is_err());
    }
}
