//! Single job run in the terminal — `forge run --provider <id>`.

use anyhow::{Context, Result};
use forge::forge_config::ForgeConfig;
use forge::orchestrator::ForgeEvent;
use forge::runtime::{self, Forge};
use forge::ui::icons::SPARKLE;
use forge::ui::{JobProgressUI, format_verdict};
use forge_common::{JobId, JobState};
use std::path::Path;
use tokio::sync::broadcast::{self, error::RecvError};

pub async fn cmd_run(
    config: &ForgeConfig,
    provider: &str,
    name: Option<&str>,
    output: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let forge = Forge::build(config).await?;
    let orchestrator = forge.orchestrator();

    let (project_id, mut rx) = {
        let mut orch = orchestrator.lock().await;
        orch.registry().descriptor(provider)?;
        let rx = orch.subscribe();
        let project = orch.create_project(name.unwrap_or(provider));
        (project.id, rx)
    };
    let job_id = runtime::start_job(&orchestrator, project_id, provider).await?;

    let ui = JobProgressUI::new(job_id, provider, verbose);
    if !orchestrator.lock().await.get_job(job_id)?.state.is_terminal() {
        follow_job(&forge, job_id, &ui, &mut rx).await?;
    }

    let outcome = {
        let orch = orchestrator.lock().await;
        let job = orch.get_job(job_id)?;
        ui.finish(job.state, job.failure_reason.as_deref());
        if let Some(verdict) = &job.verdict {
            println!("{}", format_verdict(verdict));
        }
        if job.state == JobState::Completed
            && let Some(path) = output
        {
            let artifact = orch.export(job_id)?;
            std::fs::write(path, &artifact.content)
                .with_context(|| format!("Failed to write artifact to {}", path.display()))?;
            println!("{}Artifact written to {}", SPARKLE, path.display());
        }
        job.state
    };

    forge.shutdown().await;

    if outcome != JobState::Completed {
        anyhow::bail!("Job {} finished {}", job_id, outcome);
    }
    Ok(())
}

/// Render notifications until the job reaches a terminal state. Ctrl+C
/// cancels the job.
async fn follow_job(
    forge: &Forge,
    job_id: JobId,
    ui: &JobProgressUI,
    rx: &mut broadcast::Receiver<ForgeEvent>,
) -> Result<()> {
    let orchestrator = forge.orchestrator();
    loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(event) => {
                    ui.handle(&event);
                    if let ForgeEvent::JobStateChanged { job_id: id, to, .. } = &event
                        && *id == job_id
                        && to.is_terminal()
                    {
                        return Ok(());
                    }
                }
                Err(RecvError::Lagged(_)) => {
                    if orchestrator.lock().await.get_job(job_id)?.state.is_terminal() {
                        return Ok(());
                    }
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                orchestrator.lock().await.cancel(job_id)?;
            }
        }
    }
}
