//! The job state machine.
//!
//! `JobOrchestrator` is the only component that decides job state. Every
//! change it makes is expressed as a [`JobTransition`], applied to the
//! [`ProjectStore`] and then broadcast to subscribers as a [`ForgeEvent`].
//! Callers share it as `Arc<tokio::sync::Mutex<JobOrchestrator>>`; provider
//! events are fed back in by the event pump (see `runtime`).

pub mod events;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use forge_common::{
    Artifact, ForgeError, ForgeResult, Job, JobId, JobState, ProgressEvent, ProgressSnapshot,
    Project, ProjectId, ProjectRecord,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gates::QualityGate;
use crate::provider::{
    Acceptance, InvocationRequest, ProjectContext, Provider, ProviderEvent, ProviderEvents,
    ProviderSink, provider_channel,
};
use crate::registry::ProviderRegistry;
use crate::store::ProjectStore;
use crate::tracker::ProgressTracker;

pub use events::{ForgeEvent, JobTransition, broadcast_event};

/// Capacity of the subscriber channel. Slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Stage name of the closing progress event recorded on success.
const COMPLETE_STAGE: &str = "complete";

/// Failure reason for jobs found mid-flight when records are restored.
pub const INTERRUPTED_REASON: &str = "interrupted";

/// A job recorded `Running` whose provider has not been called yet.
///
/// Owns everything the call needs, so it can be made without holding the
/// orchestrator.
pub struct PendingStart {
    provider: Provider,
    request: InvocationRequest,
    sink: ProviderSink,
}

impl PendingStart {
    pub fn job_id(&self) -> JobId {
        self.request.job_id
    }

    /// Submit the job. Pass the answer to [`JobOrchestrator::finish_start`].
    pub async fn invoke(self) -> (JobId, ForgeResult<Acceptance>) {
        let job_id = self.request.job_id;
        (job_id, self.provider.invoke(self.request, self.sink).await)
    }
}

pub struct JobOrchestrator {
    registry: Arc<ProviderRegistry>,
    gate: QualityGate,
    store: ProjectStore,
    tracker: ProgressTracker,
    sink: ProviderSink,
    /// Tokens of jobs currently `Running`.
    cancellations: HashMap<JobId, CancellationToken>,
    events: broadcast::Sender<ForgeEvent>,
}

impl JobOrchestrator {
    /// Build an orchestrator. The returned receiver carries provider events
    /// and must be drained into [`apply_provider_event`](Self::apply_provider_event).
    pub fn new(registry: Arc<ProviderRegistry>, gate: QualityGate) -> (Self, ProviderEvents) {
        let (sink, provider_events) = provider_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let orchestrator = Self {
            registry,
            gate,
            store: ProjectStore::new(),
            tracker: ProgressTracker::new(),
            sink,
            cancellations: HashMap::new(),
            events,
        };
        (orchestrator, provider_events)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForgeEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(&mut self, name: impl Into<String>) -> Project {
        let project = self.store.create_project(name).clone();
        info!(project_id = project.id, name = %project.name, "project created");
        broadcast_event(
            &self.events,
            ForgeEvent::ProjectCreated {
                project: project.clone(),
            },
        );
        project
    }

    pub fn get_project(&self, id: ProjectId) -> ForgeResult<&Project> {
        self.store.get_project(id)
    }

    pub fn list_projects(&self) -> impl Iterator<Item = &Project> {
        self.store.list_projects()
    }

    /// Delete a project. A job still in flight is cancelled first so its
    /// provider stops working; the project's job history goes with it.
    pub fn delete_project(&mut self, id: ProjectId) -> ForgeResult<ProjectRecord> {
        let active = self.store.get_project(id)?.active_job;
        if let Some(job_id) = active {
            let state = self.store.get_job(job_id)?.state;
            if state == JobState::Running {
                self.cancel(job_id)?;
            } else if state.can_transition_to(JobState::Failed) {
                self.move_to(job_id, JobState::Failed, Some("project deleted".into()))?;
            }
        }

        let record = self.store.remove_project(id)?;
        for job in &record.jobs {
            self.tracker.forget(job.id);
            self.cancellations.remove(&job.id);
        }
        info!(project_id = id, jobs = record.jobs.len(), "project deleted");
        broadcast_event(&self.events, ForgeEvent::ProjectDeleted { project_id: id });
        Ok(record)
    }

    // ── Jobs ──────────────────────────────────────────────────────────

    pub fn get_job(&self, id: JobId) -> ForgeResult<&Job> {
        self.store.get_job(id)
    }

    /// Start a job for `project_id` on `provider_id` and return its id.
    ///
    /// Fails with `Conflict` when the project already has a non-terminal job.
    /// A provider that refuses the submission does not fail the call: the job
    /// is recorded `Failed` with the refusal as its reason.
    ///
    /// This holds `&mut self` across the provider submission. Code sharing
    /// the orchestrator behind a lock uses [`runtime::start_job`] instead,
    /// which releases the lock while the provider is being called.
    ///
    /// [`runtime::start_job`]: crate::runtime::start_job
    pub async fn start(&mut self, project_id: ProjectId, provider_id: &str) -> ForgeResult<JobId> {
        let pending = self.begin_start(project_id, provider_id)?;
        let (job_id, accepted) = pending.invoke().await;
        self.finish_start(job_id, accepted)?;
        Ok(job_id)
    }

    /// Reserve a job: check for conflicts, record it `Running` and hand back
    /// the provider call still to be made.
    pub fn begin_start(
        &mut self,
        project_id: ProjectId,
        provider_id: &str,
    ) -> ForgeResult<PendingStart> {
        let project = self.store.get_project(project_id)?;
        if let Some(job_id) = project.active_job {
            return Err(ForgeError::Conflict { project_id, job_id });
        }
        let context = ProjectContext {
            project_id,
            project_name: project.name.clone(),
            attempt: project.history.len() as u32 + 1,
        };
        let provider = self.registry.get(provider_id)?.provider.clone();

        let job_id = self.store.allocate_job_id();
        self.commit(JobTransition::Created(Job::new(job_id, project_id, provider_id)))?;
        self.move_to(job_id, JobState::Running, None)?;

        let cancel = CancellationToken::new();
        self.cancellations.insert(job_id, cancel.clone());
        Ok(PendingStart {
            provider,
            request: InvocationRequest {
                job_id,
                context,
                cancel,
            },
            sink: self.sink.clone(),
        })
    }

    /// Record the provider's answer to a submission made by
    /// [`begin_start`](Self::begin_start).
    ///
    /// A refusal fails the job. If the job was cancelled or its project
    /// deleted while the provider was being called, the answer is dropped.
    pub fn finish_start(
        &mut self,
        job_id: JobId,
        accepted: ForgeResult<Acceptance>,
    ) -> ForgeResult<()> {
        let state = match self.store.get_job(job_id) {
            Ok(job) => job.state,
            Err(ForgeError::NotFound { .. }) => {
                debug!(job_id, "provider answered for a removed job");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match accepted {
            Ok(acceptance) => {
                info!(job_id, ticket = %acceptance.ticket, "job accepted by provider");
            }
            Err(e) if state == JobState::Running => {
                warn!(job_id, error = %e, "provider refused job");
                self.move_to(job_id, JobState::Failed, Some(e.to_string()))?;
            }
            Err(e) => {
                debug!(job_id, %state, error = %e, "refusal for finished job dropped");
            }
        }
        Ok(())
    }

    /// Record a progress event for a running job.
    ///
    /// Out-of-order or duplicate sequence numbers are rejected and leave the
    /// job untouched. Events for a finished job are dropped.
    pub fn report_progress(&mut self, job_id: JobId, event: ProgressEvent) -> ForgeResult<()> {
        let state = self.store.get_job(job_id)?.state;
        if state.is_terminal() {
            debug!(job_id, %state, sequence = event.sequence, "progress for finished job dropped");
            return Ok(());
        }
        if state != JobState::Running {
            return Err(ForgeError::InvalidState {
                job_id,
                state,
                operation: "accept progress",
            });
        }

        let recorded = match self.tracker.record(job_id, event) {
            Ok(recorded) => recorded.clone(),
            Err(e) => {
                warn!(job_id, error = %e, "progress rejected");
                return Err(e);
            }
        };
        self.commit(JobTransition::ProgressRecorded(recorded))?;
        Ok(())
    }

    /// Deliver the provider's final outcome for a running job and return the
    /// state the job ends up in.
    ///
    /// A successful artifact is committed, evaluated by the quality gate and
    /// the job completes or fails on the verdict. Results for a finished job
    /// are dropped and the current state is returned.
    pub fn report_provider_result(
        &mut self,
        job_id: JobId,
        outcome: Result<Artifact, String>,
    ) -> ForgeResult<JobState> {
        let state = self.store.get_job(job_id)?.state;
        if state.is_terminal() {
            debug!(job_id, %state, "result for finished job dropped");
            return Ok(state);
        }
        if state != JobState::Running {
            return Err(ForgeError::InvalidState {
                job_id,
                state,
                operation: "accept a result",
            });
        }

        let artifact = match outcome {
            Ok(artifact) => artifact,
            Err(reason) => {
                warn!(job_id, %reason, "provider reported failure");
                self.move_to(job_id, JobState::Failed, Some(reason))?;
                return Ok(JobState::Failed);
            }
        };

        self.close_progress(job_id)?;
        self.move_to(job_id, JobState::Evaluating, None)?;

        let verdict = match self.gate.evaluate(job_id, &artifact, Utc::now()) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(job_id, error = %e, "artifact rejected before evaluation");
                self.move_to(job_id, JobState::Failed, Some(e.to_string()))?;
                return Ok(JobState::Failed);
            }
        };
        self.commit(JobTransition::ArtifactReceived { job_id, artifact })?;

        let passed = verdict.passed;
        let summary = verdict.summary();
        self.commit(JobTransition::VerdictAttached(verdict))?;

        if passed {
            info!(job_id, verdict = %summary, "quality gate passed");
            self.move_to(job_id, JobState::Completed, None)?;
            Ok(JobState::Completed)
        } else {
            warn!(job_id, verdict = %summary, "quality gate rejected artifact");
            self.move_to(
                job_id,
                JobState::Failed,
                Some(format!("quality gate rejected artifact: {}", summary)),
            )?;
            Ok(JobState::Failed)
        }
    }

    /// Cancel a running job. Cancelling a finished job returns its state.
    pub fn cancel(&mut self, job_id: JobId) -> ForgeResult<JobState> {
        let state = self.store.get_job(job_id)?.state;
        if state.is_terminal() {
            return Ok(state);
        }
        if state != JobState::Running {
            return Err(ForgeError::InvalidState {
                job_id,
                state,
                operation: "be cancelled",
            });
        }

        if let Some(token) = self.cancellations.remove(&job_id) {
            token.cancel();
        }
        self.move_to(job_id, JobState::Cancelled, None)?;
        Ok(JobState::Cancelled)
    }

    /// The artifact of a completed job, exactly as the provider delivered it.
    pub fn export(&self, job_id: JobId) -> ForgeResult<&Artifact> {
        let job = self.store.get_job(job_id)?;
        if job.state != JobState::Completed {
            return Err(ForgeError::NotReady {
                job_id,
                state: job.state,
            });
        }
        job.artifact.as_ref().ok_or(ForgeError::NotReady {
            job_id,
            state: job.state,
        })
    }

    /// Start a fresh job with the same project and provider as a failed or
    /// cancelled one. The old job is left as it is.
    pub async fn retry(&mut self, job_id: JobId) -> ForgeResult<JobId> {
        let pending = self.begin_retry(job_id)?;
        let (new_job, accepted) = pending.invoke().await;
        self.finish_start(new_job, accepted)?;
        Ok(new_job)
    }

    /// [`begin_start`](Self::begin_start) for a retry of `job_id`.
    pub fn begin_retry(&mut self, job_id: JobId) -> ForgeResult<PendingStart> {
        let job = self.store.get_job(job_id)?;
        if !matches!(job.state, JobState::Failed | JobState::Cancelled) {
            return Err(ForgeError::InvalidState {
                job_id,
                state: job.state,
                operation: "be retried",
            });
        }
        let project_id = job.project_id;
        let provider_id = job.provider_id.clone();
        info!(job_id, project_id, provider = %provider_id, "retrying job");
        self.begin_start(project_id, &provider_id)
    }

    pub fn current_progress(&self, job_id: JobId) -> ForgeResult<ProgressSnapshot> {
        self.store.get_job(job_id)?;
        Ok(self.tracker.current_progress(job_id))
    }

    /// Apply one event from a provider task.
    pub fn apply_provider_event(&mut self, event: ProviderEvent) -> ForgeResult<()> {
        match event {
            ProviderEvent::Progress(progress) => self.report_progress(progress.job_id, progress),
            ProviderEvent::Finished { job_id, outcome } => {
                self.report_provider_result(job_id, outcome).map(|_| ())
            }
        }
    }

    /// Load persisted projects. Jobs that were still in flight when the
    /// records were written are failed as interrupted; the number of such
    /// jobs is returned.
    pub fn restore(&mut self, records: Vec<ProjectRecord>) -> ForgeResult<usize> {
        for record in records {
            for job in &record.jobs {
                self.tracker.restore(job.id, job.progress.clone());
            }
            self.store.restore(record);
        }

        let interrupted = self.store.non_terminal_jobs();
        for &(job_id, _) in &interrupted {
            self.move_to(job_id, JobState::Failed, Some(INTERRUPTED_REASON.into()))?;
        }
        if !interrupted.is_empty() {
            warn!(count = interrupted.len(), "marked interrupted jobs as failed");
        }
        Ok(interrupted.len())
    }

    // ── Internals ─────────────────────────────────────────────────────

    /// Record a final progress event at 100% unless the provider already did.
    fn close_progress(&mut self, job_id: JobId) -> ForgeResult<()> {
        if self.tracker.current_progress(job_id).fraction() >= 1.0 {
            return Ok(());
        }
        let sequence = self.tracker.last_sequence(job_id) + 1;
        let event = ProgressEvent::new(job_id, sequence, COMPLETE_STAGE, 1.0);
        let recorded = self.tracker.record(job_id, event)?.clone();
        self.commit(JobTransition::ProgressRecorded(recorded))?;
        Ok(())
    }

    fn move_to(&mut self, job_id: JobId, to: JobState, reason: Option<String>) -> ForgeResult<()> {
        let from = self.store.get_job(job_id)?.state;
        if !from.can_transition_to(to) {
            return Err(ForgeError::InvalidState {
                job_id,
                state: from,
                operation: "change state",
            });
        }

        self.commit(JobTransition::StateChanged {
            job_id,
            from,
            to,
            reason: reason.clone(),
            at: Utc::now(),
        })?;
        if to.is_terminal() {
            self.cancellations.remove(&job_id);
        }

        match reason {
            Some(reason) => info!(job_id, %from, %to, %reason, "job state changed"),
            None => info!(job_id, %from, %to, "job state changed"),
        }
        Ok(())
    }

    fn commit(&mut self, transition: JobTransition) -> ForgeResult<ProjectId> {
        let project_id = self.store.apply(&transition)?;
        broadcast_event(
            &self.events,
            ForgeEvent::from_transition(project_id, &transition),
        );
        Ok(project_id)
    }
}
