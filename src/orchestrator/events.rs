//! Transition records and subscriber notifications.
//!
//! The orchestrator decides; the store applies [`JobTransition`]s; subscribers
//! (WebSocket clients, the persistence task, the CLI progress bar) receive
//! [`ForgeEvent`]s.

use chrono::{DateTime, Utc};
use forge_common::{
    Artifact, Job, JobId, JobState, ProgressEvent, Project, ProjectId, QualityVerdict,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One change to a job, produced by the orchestrator.
#[derive(Debug, Clone)]
pub enum JobTransition {
    Created(Job),
    StateChanged {
        job_id: JobId,
        from: JobState,
        to: JobState,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    ProgressRecorded(ProgressEvent),
    ArtifactReceived {
        job_id: JobId,
        artifact: Artifact,
    },
    VerdictAttached(QualityVerdict),
}

impl JobTransition {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Created(job) => job.id,
            Self::StateChanged { job_id, .. } => *job_id,
            Self::ProgressRecorded(event) => event.job_id,
            Self::ArtifactReceived { job_id, .. } => *job_id,
            Self::VerdictAttached(verdict) => verdict.job_id,
        }
    }
}

/// Notification pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ForgeEvent {
    ProjectCreated {
        project: Project,
    },
    ProjectDeleted {
        project_id: ProjectId,
    },
    JobCreated {
        project_id: ProjectId,
        job_id: JobId,
        provider_id: String,
    },
    JobStateChanged {
        project_id: ProjectId,
        job_id: JobId,
        from: JobState,
        to: JobState,
        reason: Option<String>,
    },
    JobProgress {
        project_id: ProjectId,
        job_id: JobId,
        sequence: u64,
        stage: String,
        fraction: f64,
        message: Option<String>,
    },
    JobArtifactReady {
        project_id: ProjectId,
        job_id: JobId,
        name: String,
        media_type: String,
    },
    JobVerdict {
        project_id: ProjectId,
        verdict: QualityVerdict,
    },
}

impl ForgeEvent {
    pub fn from_transition(project_id: ProjectId, transition: &JobTransition) -> Self {
        match transition {
            JobTransition::Created(job) => Self::JobCreated {
                project_id,
                job_id: job.id,
                provider_id: job.provider_id.clone(),
            },
            JobTransition::StateChanged {
                job_id,
                from,
                to,
                reason,
                ..
            } => Self::JobStateChanged {
                project_id,
                job_id: *job_id,
                from: *from,
                to: *to,
                reason: reason.clone(),
            },
            JobTransition::ProgressRecorded(event) => Self::JobProgress {
                project_id,
                job_id: event.job_id,
                sequence: event.sequence,
                stage: event.stage.clone(),
                fraction: event.fraction,
                message: event.message.clone(),
            },
            JobTransition::ArtifactReceived { job_id, artifact } => Self::JobArtifactReady {
                project_id,
                job_id: *job_id,
                name: artifact.name.clone(),
                media_type: artifact.media_type.clone(),
            },
            JobTransition::VerdictAttached(verdict) => Self::JobVerdict {
                project_id,
                verdict: verdict.clone(),
            },
        }
    }

    pub fn project_id(&self) -> ProjectId {
        match self {
            Self::ProjectCreated { project } => project.id,
            Self::ProjectDeleted { project_id }
            | Self::JobCreated { project_id, .. }
            | Self::JobStateChanged { project_id, .. }
            | Self::JobProgress { project_id, .. }
            | Self::JobArtifactReady { project_id, .. }
            | Self::JobVerdict { project_id, .. } => *project_id,
        }
    }

    /// The job this event concerns, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::ProjectCreated { .. } | Self::ProjectDeleted { .. } => None,
            Self::JobCreated { job_id, .. }
            | Self::JobStateChanged { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobArtifactReady { job_id, .. } => Some(*job_id),
            Self::JobVerdict { verdict, .. } => Some(verdict.job_id),
        }
    }
}

/// Broadcast an event. Silently succeeds with no subscribers.
pub fn broadcast_event(tx: &broadcast::Sender<ForgeEvent>, event: ForgeEvent) {
    let _ = tx.send(event);
}
