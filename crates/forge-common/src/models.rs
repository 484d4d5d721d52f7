use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::findings::QualityVerdict;

pub type ProjectId = i64;
pub type JobId = i64;

// ── Job lifecycle ─────────────────────────────────────────────────────

/// Lifecycle state of a generation job.
///
/// ```text
/// Created ─> Running ─> Evaluating ─> Completed
///               │            └──────> Failed
///               ├──────────────────> Failed
///               └──────────────────> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    Evaluating,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Evaluating => "evaluating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Created, Self::Failed)
                | (Self::Running, Self::Evaluating)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
                | (Self::Evaluating, Self::Completed)
                | (Self::Evaluating, Self::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "evaluating" => Ok(Self::Evaluating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}

// ── Progress ──────────────────────────────────────────────────────────

/// A single sequenced progress update for a job. Sequence numbers start at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub sequence: u64,
    pub stage: String,
    /// Completion fraction in `[0, 1]`.
    pub fraction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(job_id: JobId, sequence: u64, stage: impl Into<String>, fraction: f64) -> Self {
        Self {
            job_id,
            sequence,
            stage: stage.into(),
            fraction,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Percentage rounded down, clamped to 0..=100.
    pub fn percent(&self) -> u8 {
        (self.fraction.clamp(0.0, 1.0) * 100.0).floor() as u8
    }
}

/// Displayable progress for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressSnapshot {
    NotStarted,
    Reported {
        sequence: u64,
        stage: String,
        fraction: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ProgressSnapshot {
    pub fn fraction(&self) -> f64 {
        match self {
            Self::NotStarted => 0.0,
            Self::Reported { fraction, .. } => *fraction,
        }
    }

    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::NotStarted => None,
            Self::Reported { stage, .. } => Some(stage),
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Self::NotStarted => 0,
            Self::Reported { sequence, .. } => *sequence,
        }
    }
}

impl From<&ProgressEvent> for ProgressSnapshot {
    fn from(event: &ProgressEvent) -> Self {
        Self::Reported {
            sequence: event.sequence,
            stage: event.stage.clone(),
            fraction: event.fraction,
            message: event.message.clone(),
        }
    }
}

// ── Artifacts ─────────────────────────────────────────────────────────

/// Output of a successful provider run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub media_type: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ── Providers ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    #[serde(default)]
    pub supports_cancel: bool,
    /// Number of progress stages the provider usually reports. 0 = unknown.
    #[serde(default)]
    pub expected_stages: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: ProviderCapabilities,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: ProviderCapabilities::default(),
        }
    }

    pub fn with_cancel(mut self, supports_cancel: bool) -> Self {
        self.capabilities.supports_cancel = supports_cancel;
        self
    }

    pub fn with_expected_stages(mut self, stages: u32) -> Self {
        self.capabilities.expected_stages = stages;
        self
    }
}

// ── Jobs and projects ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    pub provider_id: String,
    pub state: JobState,
    #[serde(default)]
    pub progress: Vec<ProgressEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<QualityVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, project_id: ProjectId, provider_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id,
            provider_id: provider_id.into(),
            state: JobState::Created,
            progress: Vec::new(),
            artifact: None,
            verdict: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id,
            provider_id: self.provider_id.clone(),
            state: self.state,
            passed: self.verdict.as_ref().map(|v| v.passed),
            failure_reason: self.failure_reason.clone(),
            started_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

/// Condensed view of a job kept in its project's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub provider_id: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// The job currently in a non-terminal state, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_job: Option<JobId>,
    /// Every job of this project, oldest first.
    #[serde(default)]
    pub history: Vec<JobSummary>,
    /// Mirrors the active job, or the last job once it has finished.
    /// `None` until the first job is started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobState>,
}

impl Project {
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
            active_job: None,
            history: Vec::new(),
            status: None,
        }
    }
}

/// A project together with all of its jobs, the unit of persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project: Project,
    pub jobs: Vec<Job>,
}
