//! Rule definitions for the quality gate.
//!
//! Rules are configured under `[quality.rules.<id>]` in `forge.toml`:
//!
//! ```toml
//! [quality.rules.length]
//! kind = "min_length"
//! min = 200
//!
//! [quality.rules.no-placeholders]
//! kind = "forbidden_terms"
//! terms = ["TODO", "lorem ipsum"]
//! severity = "warning"
//!
//! [quality.rules.score]
//! kind = "metadata_min"
//! key = "score"
//! min = 0.7
//! enabled = false
//! ```

use forge_common::{Artifact, Finding, ForgeError, ForgeResult, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What a rule checks, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Content must have at least `min` characters.
    MinLength { min: usize },
    /// Content must have at most `max` characters.
    MaxLength { max: usize },
    /// Every term must appear in the content (case-insensitive).
    RequiredTerms { terms: Vec<String> },
    /// No term may appear in the content (case-insensitive).
    ForbiddenTerms { terms: Vec<String> },
    /// The regex must not match the content.
    ForbiddenPattern { pattern: String },
    /// Every key must be present in the artifact metadata.
    RequiredMetadata { keys: Vec<String> },
    /// Numeric metadata value at `key` must be at least `min`.
    MetadataMin { key: String, min: f64 },
    /// Media type must be one of `allowed`.
    MediaType { allowed: Vec<String> },
}

/// One `[quality.rules.<id>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the default `error` severity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

fn default_enabled() -> bool {
    true
}

impl RuleConfig {
    pub fn new(kind: RuleKind) -> Self {
        Self {
            kind,
            enabled: true,
            severity: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A validated rule ready for evaluation.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub severity: Severity,
    check: Check,
}

#[derive(Debug, Clone)]
enum Check {
    MinLength(usize),
    MaxLength(usize),
    RequiredTerms(Vec<String>),
    ForbiddenTerms(Vec<String>),
    ForbiddenPattern(Regex),
    RequiredMetadata(Vec<String>),
    MetadataMin { key: String, min: f64 },
    MediaType(Vec<String>),
}

impl Rule {
    /// Compile a configured rule. Fails with `Config` for an invalid regex
    /// or an empty term list.
    pub fn compile(id: &str, config: &RuleConfig) -> ForgeResult<Self> {
        let check = match &config.kind {
            RuleKind::MinLength { min } => Check::MinLength(*min),
            RuleKind::MaxLength { max } => Check::MaxLength(*max),
            RuleKind::RequiredTerms { terms } => Check::RequiredTerms(non_empty(id, terms)?),
            RuleKind::ForbiddenTerms { terms } => Check::ForbiddenTerms(non_empty(id, terms)?),
            RuleKind::ForbiddenPattern { pattern } => {
                let regex = Regex::new(pattern).map_err(|e| {
                    ForgeError::Config(format!("rule '{}': invalid pattern: {}", id, e))
                })?;
                Check::ForbiddenPattern(regex)
            }
            RuleKind::RequiredMetadata { keys } => Check::RequiredMetadata(non_empty(id, keys)?),
            RuleKind::MetadataMin { key, min } => Check::MetadataMin {
                key: key.clone(),
                min: *min,
            },
            RuleKind::MediaType { allowed } => Check::MediaType(non_empty(id, allowed)?),
        };

        Ok(Self {
            id: id.to_string(),
            severity: config.severity.unwrap_or_default(),
            check,
        })
    }

    /// Findings for this rule, empty when the artifact satisfies it.
    pub fn check(&self, artifact: &Artifact) -> Vec<Finding> {
        let finding = |message: String| Finding::new(self.severity, self.id.as_str(), message);

        match &self.check {
            Check::MinLength(min) => {
                let len = artifact.content.chars().count();
                if len < *min {
                    vec![
                        finding(format!("Content has {} characters, minimum is {}", len, min))
                            .with_location("content"),
                    ]
                } else {
                    Vec::new()
                }
            }
            Check::MaxLength(max) => {
                let len = artifact.content.chars().count();
                if len > *max {
                    vec![
                        finding(format!("Content has {} characters, maximum is {}", len, max))
                            .with_location("content"),
                    ]
                } else {
                    Vec::new()
                }
            }
            Check::RequiredTerms(terms) => {
                let haystack = artifact.content.to_lowercase();
                terms
                    .iter()
                    .filter(|term| !haystack.contains(&term.to_lowercase()))
                    .map(|term| {
                        finding(format!("Required term '{}' is missing", term))
                            .with_location("content")
                    })
                    .collect()
            }
            Check::ForbiddenTerms(terms) => {
                let haystack = artifact.content.to_lowercase();
                terms
                    .iter()
                    .filter_map(|term| {
                        haystack.find(&term.to_lowercase()).map(|offset| {
                            finding(format!("Forbidden term '{}' is present", term))
                                .with_location(line_location(&haystack, offset))
                        })
                    })
                    .collect()
            }
            Check::ForbiddenPattern(regex) => match regex.find(&artifact.content) {
                Some(m) => vec![
                    finding(format!(
                        "Content matches forbidden pattern '{}': '{}'",
                        regex.as_str(),
                        m.as_str()
                    ))
                    .with_location(line_location(&artifact.content, m.start())),
                ],
                None => Vec::new(),
            },
            Check::RequiredMetadata(keys) => keys
                .iter()
                .filter(|key| !artifact.metadata.contains_key(key.as_str()))
                .map(|key| {
                    finding(format!("Metadata key '{}' is missing", key))
                        .with_location(format!("metadata.{}", key))
                })
                .collect(),
            Check::MetadataMin { key, min } => {
                let location = format!("metadata.{}", key);
                match artifact.metadata.get(key).map(|v| v.as_f64()) {
                    None => vec![
                        finding(format!("Metadata key '{}' is missing", key))
                            .with_location(location),
                    ],
                    Some(None) => vec![
                        finding(format!("Metadata value '{}' is not a number", key))
                            .with_location(location),
                    ],
                    Some(Some(value)) if value < *min => vec![
                        finding(format!("Metadata '{}' is {}, minimum is {}", key, value, min))
                            .with_location(location),
                    ],
                    Some(Some(_)) => Vec::new(),
                }
            }
            Check::MediaType(allowed) => {
                if allowed.iter().any(|t| t.eq_ignore_ascii_case(&artifact.media_type)) {
                    Vec::new()
                } else {
                    vec![
                        finding(format!(
                            "Media type '{}' is not one of: {}",
                            artifact.media_type,
                            allowed.join(", ")
                        ))
                        .with_location("media_type"),
                    ]
                }
            }
        }
    }
}

fn non_empty(id: &str, values: &[String]) -> ForgeResult<Vec<String>> {
    if values.is_empty() {
        return Err(ForgeError::Config(format!("rule '{}': list must not be empty", id)));
    }
    Ok(values.to_vec())
}

/// `content:<line>` for the byte offset, 1-based.
fn line_location(text: &str, offset: usize) -> String {
    let line = text[..offset].matches('\n').count() + 1;
    format!("content:{}", line)
}
