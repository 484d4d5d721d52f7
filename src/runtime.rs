//! Process wiring: builds the orchestrator from configuration and runs the
//! background tasks around it.
//!
//! ```text
//! provider tasks ──ProviderEvent──> event pump ──> JobOrchestrator
//!                                                      │ ForgeEvent
//!                                   ┌──────────────────┼──────────────┐
//!                                   ▼                  ▼              ▼
//!                            persistence task     /ws clients    CLI progress
//! ```

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use forge_common::{ForgeError, ForgeResult, JobId, ProjectId, ProjectRecord};

use crate::forge_config::ForgeConfig;
use crate::orchestrator::{ForgeEvent, JobOrchestrator, PendingStart};
use crate::persistence::{JsonFileRepository, ProjectRepository};
use crate::provider::ProviderEvents;

pub type SharedOrchestrator = Arc<Mutex<JobOrchestrator>>;

/// Start a job on a shared orchestrator. The lock is released while the
/// provider is being called, so a slow submission only holds up its own job.
pub async fn start_job(
    orchestrator: &SharedOrchestrator,
    project_id: ProjectId,
    provider_id: &str,
) -> ForgeResult<JobId> {
    let pending = orchestrator
        .lock()
        .await
        .begin_start(project_id, provider_id)?;
    submit(orchestrator, pending).await
}

/// Retry a failed or cancelled job on a shared orchestrator. See [`start_job`].
pub async fn retry_job(orchestrator: &SharedOrchestrator, job_id: JobId) -> ForgeResult<JobId> {
    let pending = orchestrator.lock().await.begin_retry(job_id)?;
    submit(orchestrator, pending).await
}

async fn submit(orchestrator: &SharedOrchestrator, pending: PendingStart) -> ForgeResult<JobId> {
    debug!(job_id = pending.job_id(), "submitting job to provider");
    let (job_id, accepted) = pending.invoke().await;
    orchestrator.lock().await.finish_start(job_id, accepted)?;
    Ok(job_id)
}

/// A running Forge instance.
pub struct Forge {
    orchestrator: SharedOrchestrator,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Forge {
    /// Build the registry, gate and orchestrator from `config`, restore
    /// persisted projects and start the background tasks.
    pub async fn build(config: &ForgeConfig) -> Result<Self> {
        let registry = config
            .toml
            .build_registry()
            .context("Failed to build provider registry")?;
        let gate = config
            .toml
            .build_gate()
            .context("Failed to build quality gate")?;
        info!(
            providers = registry.len(),
            rules = gate.rules().len(),
            "orchestrator configured"
        );

        let (mut orchestrator, provider_events) = JobOrchestrator::new(Arc::new(registry), gate);
        let shutdown = CancellationToken::new();

        let persistence = if config.toml.storage.persist {
            let repository: Arc<dyn ProjectRepository> =
                Arc::new(JsonFileRepository::new(config.projects_dir()));
            // Subscribe before restoring so interrupted jobs are written back.
            let events = orchestrator.subscribe();
            let records = repository
                .load_all()
                .await
                .context("Failed to load persisted projects")?;
            let count = records.len();
            orchestrator
                .restore(records)
                .context("Failed to restore persisted projects")?;
            if count > 0 {
                info!(projects = count, "restored persisted projects");
            }
            Some((repository, events))
        } else {
            None
        };

        let orchestrator = Arc::new(Mutex::new(orchestrator));
        let mut tasks = vec![spawn_event_pump(
            orchestrator.clone(),
            provider_events,
            shutdown.clone(),
        )];
        if let Some((repository, events)) = persistence {
            tasks.push(spawn_persistence(
                orchestrator.clone(),
                repository,
                events,
                shutdown.clone(),
            ));
        }

        Ok(Self {
            orchestrator,
            shutdown,
            tasks,
        })
    }

    pub fn orchestrator(&self) -> SharedOrchestrator {
        self.orchestrator.clone()
    }

    /// Stop the background tasks. Pending notifications are persisted first.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
    }
}

/// Feed provider events into the orchestrator in arrival order.
pub fn spawn_event_pump(
    orchestrator: SharedOrchestrator,
    mut events: ProviderEvents,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let job_id = event.job_id();
            let result = orchestrator.lock().await.apply_provider_event(event);
            match result {
                Ok(()) => {}
                // The project was deleted while the provider was still working.
                Err(ForgeError::NotFound { .. }) => {
                    debug!(job_id, "provider event for removed job dropped")
                }
                Err(e) => warn!(job_id, error = %e, "provider event rejected"),
            }
        }
        debug!("event pump stopped");
    })
}

/// Save a project's record whenever one of its events goes by.
pub fn spawn_persistence(
    orchestrator: SharedOrchestrator,
    repository: Arc<dyn ProjectRepository>,
    mut events: broadcast::Receiver<ForgeEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => {
                    while let Ok(event) = events.try_recv() {
                        persist_event(&orchestrator, repository.as_ref(), event).await;
                    }
                    break;
                }
                received = events.recv() => received,
            };

            match received {
                Ok(event) => persist_event(&orchestrator, repository.as_ref(), event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "persistence fell behind, resyncing every project");
                    resync(&orchestrator, repository.as_ref()).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("persistence task stopped");
    })
}

async fn persist_event(
    orchestrator: &SharedOrchestrator,
    repository: &dyn ProjectRepository,
    event: ForgeEvent,
) {
    let project_id = event.project_id();
    if matches!(event, ForgeEvent::ProjectDeleted { .. }) {
        if let Err(e) = repository.remove(project_id).await {
            warn!(project_id, error = %e, "failed to remove project record");
        }
        return;
    }

    let record = orchestrator.lock().await.store().record(project_id);
    match record {
        Ok(record) => save(repository, &record).await,
        Err(_) => debug!(project_id, "project gone before it could be saved"),
    }
}

/// Make storage match the store after notifications were lost: save every
/// live project and remove records of projects deleted in the meantime.
async fn resync(orchestrator: &SharedOrchestrator, repository: &dyn ProjectRepository) {
    let records: Vec<ProjectRecord> = {
        let orch = orchestrator.lock().await;
        orch.list_projects()
            .filter_map(|p| orch.store().record(p.id).ok())
            .collect()
    };
    for record in &records {
        save(repository, record).await;
    }

    let stored = match repository.ids().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "failed to list stored project records");
            return;
        }
    };
    let live: HashSet<ProjectId> = records.iter().map(|r| r.project.id).collect();
    for project_id in stored.into_iter().filter(|id| !live.contains(id)) {
        match repository.remove(project_id).await {
            Ok(_) => debug!(project_id, "removed record of deleted project"),
            Err(e) => warn!(project_id, error = %e, "failed to remove project record"),
        }
    }
}

async fn save(repository: &dyn ProjectRepository, record: &ProjectRecord) {
    if let Err(e) = repository.save(record).await {
        warn!(project_id = record.project.id, error = %e, "failed to save project record");
    }
}
