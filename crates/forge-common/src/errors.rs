//! Typed error taxonomy for the Forge orchestrator.
//!
//! Structural errors (unknown provider, duplicate registration, bad config)
//! are returned to the caller. Lifecycle errors (provider failure, gate
//! rejection) are recorded on the job instead, so only a few of these ever
//! reach the presentation layer for a job that is already running.

use thiserror::Error;

use crate::models::{JobId, JobState, ProjectId};

pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Project {project_id} already has an active job ({job_id})")]
    Conflict { project_id: ProjectId, job_id: JobId },

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Provider '{0}' is already registered")]
    DuplicateProvider(String),

    #[error("Out-of-order progress for job {job_id}: expected sequence {expected}, got {received}")]
    OutOfOrderProgress {
        job_id: JobId,
        expected: u64,
        received: u64,
    },

    #[error("Invalid progress for job {job_id}: {reason}")]
    InvalidProgress { job_id: JobId, reason: String },

    #[error("Job {job_id} is not ready for export (state: {state})")]
    NotReady { job_id: JobId, state: JobState },

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Job {job_id} cannot {operation} while {state}")]
    InvalidState {
        job_id: JobId,
        state: JobState,
        operation: &'static str,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ForgeError {
    pub fn project_not_found(id: ProjectId) -> Self {
        Self::NotFound { kind: "Project", id }
    }

    pub fn job_not_found(id: JobId) -> Self {
        Self::NotFound { kind: "Job", id }
    }
}
