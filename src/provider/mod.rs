//! Generation providers.
//!
//! A provider is invoked once per job. `invoke` returns as soon as the
//! provider has accepted the work; everything after that (progress, the final
//! artifact or error) arrives out of band as [`ProviderEvent`]s on the sink
//! the orchestrator hands in. The set of providers is closed: adding one
//! means adding a [`Provider`] variant, the orchestrator never changes.

pub mod http;
pub mod template;

use forge_common::{Artifact, ForgeResult, JobId, ProgressEvent, ProjectId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use http::{HttpProvider, HttpProviderConfig};
pub use template::TemplateProvider;

/// What the provider is told about the job it is working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_id: ProjectId,
    pub project_name: String,
    /// 1 for the first job of the project, incremented on each retry.
    pub attempt: u32,
}

/// Everything a provider needs to run one job.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub job_id: JobId,
    pub context: ProjectContext,
    /// Fired when the job is cancelled. Providers stop emitting once it is.
    pub cancel: CancellationToken,
}

/// Returned once the provider has accepted a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceptance {
    /// Provider-side handle for the job (a remote ticket, or a local id).
    pub ticket: String,
}

/// Out-of-band message from a provider about one job.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Progress(ProgressEvent),
    Finished {
        job_id: JobId,
        outcome: Result<Artifact, String>,
    },
}

impl ProviderEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Progress(event) => event.job_id,
            Self::Finished { job_id, .. } => *job_id,
        }
    }
}

pub type ProviderSink = mpsc::UnboundedSender<ProviderEvent>;
pub type ProviderEvents = mpsc::UnboundedReceiver<ProviderEvent>;

pub fn provider_channel() -> (ProviderSink, ProviderEvents) {
    mpsc::unbounded_channel()
}

/// The configured provider implementations.
#[derive(Debug, Clone)]
pub enum Provider {
    /// Local, deterministic staged generation.
    Template(TemplateProvider),
    /// Remote backend driven over HTTP.
    Http(HttpProvider),
    /// The backend pushes progress and results through the Forge API; invoking
    /// only acknowledges the job.
    External,
}

impl Provider {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Template(_) => "template",
            Self::Http(_) => "http",
            Self::External => "external",
        }
    }

    /// Submit a job. Returns once the provider has accepted it; a refusal is
    /// a `Provider` error.
    pub async fn invoke(
        &self,
        request: InvocationRequest,
        sink: ProviderSink,
    ) -> ForgeResult<Acceptance> {
        match self {
            Self::Template(provider) => Ok(provider.invoke(request, sink)),
            Self::Http(provider) => provider.invoke(request, sink).await,
            Self::External => Ok(Acceptance {
                ticket: format!("external-{}", request.job_id),
            }),
        }
    }
}

/// Send an event, tolerating a closed channel (the orchestrator is gone).
pub(crate) fn emit(sink: &ProviderSink, event: ProviderEvent) -> bool {
    let job_id = event.job_id();
    if sink.send(event).is_err() {
        tracing::debug!(job_id, "provider event dropped, orchestrator channel closed");
        return false;
    }
    true
}
