//! In-memory registry of projects and their jobs.
//!
//! The store is the single owner of `Project` and `Job` records. It never
//! decides job state: every job mutation arrives as a [`JobTransition`]
//! produced by the orchestrator.

use std::collections::BTreeMap;

use forge_common::{
    ForgeError, ForgeResult, Job, JobId, JobState, Project, ProjectId, ProjectRecord,
};

use crate::orchestrator::events::JobTransition;

#[derive(Debug)]
pub struct ProjectStore {
    /// Ids are allocated monotonically, so key order is insertion order.
    projects: BTreeMap<ProjectId, Project>,
    jobs: BTreeMap<JobId, Job>,
    next_project_id: ProjectId,
    next_job_id: JobId,
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self {
            projects: BTreeMap::new(),
            jobs: BTreeMap::new(),
            next_project_id: 1,
            next_job_id: 1,
        }
    }
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_project(&mut self, name: impl Into<String>) -> &Project {
        let id = self.next_project_id;
        self.next_project_id += 1;
        self.projects.entry(id).or_insert(Project::new(id, name))
    }

    pub fn get_project(&self, id: ProjectId) -> ForgeResult<&Project> {
        self.projects
            .get(&id)
            .ok_or_else(|| ForgeError::project_not_found(id))
    }

    /// Projects in creation order.
    pub fn list_projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    pub fn get_job(&self, id: JobId) -> ForgeResult<&Job> {
        self.jobs.get(&id).ok_or_else(|| ForgeError::job_not_found(id))
    }

    /// Jobs of a project, oldest first.
    pub fn jobs_for_project(&self, project_id: ProjectId) -> impl Iterator<Item = &Job> {
        self.jobs
            .values()
            .filter(move |job| job.project_id == project_id)
    }

    /// The project's non-terminal job, if any.
    pub fn active_job(&self, project_id: ProjectId) -> Option<&Job> {
        self.projects
            .get(&project_id)
            .and_then(|p| p.active_job)
            .and_then(|id| self.jobs.get(&id))
    }

    pub(crate) fn allocate_job_id(&mut self) -> JobId {
        let id = self.next_job_id;
        self.next_job_id += 1;
        id
    }

    /// Apply an orchestrator transition, keeping the owning project's
    /// summary, status and active-job pointer in step with the job.
    /// Returns the id of the project the job belongs to.
    pub fn apply(&mut self, transition: &JobTransition) -> ForgeResult<ProjectId> {
        if let JobTransition::Created(job) = transition {
            let project = self
                .projects
                .get_mut(&job.project_id)
                .ok_or_else(|| ForgeError::project_not_found(job.project_id))?;
            project.active_job = Some(job.id);
            project.status = Some(job.state);
            project.history.push(job.summary());
            self.jobs.insert(job.id, job.clone());
            return Ok(job.project_id);
        }

        let job_id = transition.job_id();
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ForgeError::job_not_found(job_id))?;

        match transition {
            JobTransition::Created(_) => unreachable!("handled above"),
            JobTransition::StateChanged { to, reason, at, .. } => {
                job.state = *to;
                job.updated_at = *at;
                if reason.is_some() {
                    job.failure_reason = reason.clone();
                }
                if to.is_terminal() {
                    job.finished_at = Some(*at);
                }
            }
            JobTransition::ProgressRecorded(event) => {
                job.progress.push(event.clone());
                job.updated_at = chrono::Utc::now();
            }
            JobTransition::ArtifactReceived { artifact, .. } => {
                job.artifact = Some(artifact.clone());
            }
            JobTransition::VerdictAttached(verdict) => {
                job.verdict = Some(verdict.clone());
            }
        }

        let project_id = job.project_id;
        let summary = job.summary();
        let state = job.state;
        if let Some(project) = self.projects.get_mut(&project_id) {
            if let Some(entry) = project.history.iter_mut().find(|s| s.job_id == job_id) {
                *entry = summary;
            }
            if project.active_job == Some(job_id) || project.active_job.is_none() {
                project.status = Some(state);
            }
            if state.is_terminal() && project.active_job == Some(job_id) {
                project.active_job = None;
            }
        }
        Ok(project_id)
    }

    /// Snapshot of a project and all of its jobs.
    pub fn record(&self, id: ProjectId) -> ForgeResult<ProjectRecord> {
        let project = self.get_project(id)?.clone();
        let jobs = self.jobs_for_project(id).cloned().collect();
        Ok(ProjectRecord { project, jobs })
    }

    /// Remove a project and its job history.
    pub fn remove_project(&mut self, id: ProjectId) -> ForgeResult<ProjectRecord> {
        let record = self.record(id)?;
        self.projects.remove(&id);
        self.jobs.retain(|_, job| job.project_id != id);
        Ok(record)
    }

    /// Load a persisted record. Id counters move past anything restored.
    pub fn restore(&mut self, record: ProjectRecord) {
        let ProjectRecord { project, jobs } = record;
        self.next_project_id = self.next_project_id.max(project.id + 1);
        for job in jobs {
            self.next_job_id = self.next_job_id.max(job.id + 1);
            self.jobs.insert(job.id, job);
        }
        self.projects.insert(project.id, project);
    }

    /// Ids of jobs not yet in a terminal state, across all projects.
    pub fn non_terminal_jobs(&self) -> Vec<(JobId, JobState)> {
        self.jobs
            .values()
            .filter(|job| !job.state.is_terminal())
            .map(|job| (job.id, job.state))
            .collect()
    }
}
