//! Provider backed by a remote generation service.
//!
//! Wire contract:
//!
//! | Call                                        | Purpose                         |
//! |---------------------------------------------|---------------------------------|
//! | `POST {base}/v1/generations`                | submit, returns `{ticket}`      |
//! | `GET  {base}/v1/generations/{ticket}?after` | new events + status since `after` |
//! | `POST {base}/v1/generations/{ticket}/cancel`| best-effort cancellation        |
//!
//! After acceptance a background task polls for progress and forwards it to
//! the orchestrator until the remote job finishes or the job is cancelled.

use std::time::Duration;

use forge_common::{Artifact, ForgeError, ForgeResult, JobId, ProgressEvent};
use serde::{Deserialize, Serialize};

use super::{Acceptance, InvocationRequest, ProjectContext, ProviderEvent, ProviderSink, emit};

/// Consecutive poll failures tolerated before the job is failed.
const MAX_POLL_FAILURES: u32 = 3;

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    /// Provider name as the remote service knows it.
    pub remote_id: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub supports_cancel: bool,
}

#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    provider: &'a str,
    job_id: JobId,
    project: &'a ProjectContext,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    ticket: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RemoteStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Deserialize)]
struct RemoteProgress {
    sequence: u64,
    stage: String,
    fraction: f64,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    events: Vec<RemoteProgress>,
    status: RemoteStatus,
    #[serde(default)]
    artifact: Option<Artifact>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> ForgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ForgeError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Submit the job and spawn the poll loop once the backend accepts it.
    pub async fn invoke(
        &self,
        request: InvocationRequest,
        sink: ProviderSink,
    ) -> ForgeResult<Acceptance> {
        let body = SubmitRequest {
            provider: &self.config.remote_id,
            job_id: request.job_id,
            project: &request.context,
        };
        let response = self
            .client
            .post(self.url("v1/generations"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Provider(format!("submit failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ForgeError::Provider(format!(
                "backend refused job ({}): {}",
                status,
                text.trim()
            )));
        }
        let accepted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::Provider(format!("invalid submit response: {}", e)))?;

        tracing::info!(
            job_id = request.job_id,
            ticket = %accepted.ticket,
            provider = %self.config.remote_id,
            "remote generation accepted"
        );

        let provider = self.clone();
        let ticket = accepted.ticket.clone();
        tokio::spawn(async move { provider.poll_until_done(request, ticket, sink).await });

        Ok(Acceptance {
            ticket: accepted.ticket,
        })
    }

    async fn poll_until_done(self, request: InvocationRequest, ticket: String, sink: ProviderSink) {
        let job_id = request.job_id;
        let mut after = 0u64;
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = request.cancel.cancelled() => {
                    if self.config.supports_cancel {
                        self.cancel_remote(&ticket).await;
                    }
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let poll = match self.poll(&ticket, after).await {
                Ok(poll) => {
                    failures = 0;
                    poll
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(job_id, %ticket, failures, error = %e, "poll failed");
                    if failures >= MAX_POLL_FAILURES {
                        emit(
                            &sink,
                            ProviderEvent::Finished {
                                job_id,
                                outcome: Err(format!(
                                    "lost contact with backend after {} attempts: {}",
                                    failures, e
                                )),
                            },
                        );
                        return;
                    }
                    continue;
                }
            };

            // A cancel may have landed while the request was in flight.
            if request.cancel.is_cancelled() {
                continue;
            }

            let seen = after;
            for remote in poll.events.into_iter().filter(move |e| e.sequence > seen) {
                after = remote.sequence;
                let mut event =
                    ProgressEvent::new(job_id, remote.sequence, remote.stage, remote.fraction);
                event.message = remote.message;
                if !emit(&sink, ProviderEvent::Progress(event)) {
                    return;
                }
            }

            let outcome = match poll.status {
                RemoteStatus::Queued | RemoteStatus::Running => continue,
                RemoteStatus::Succeeded => poll
                    .artifact
                    .ok_or_else(|| "backend reported success without an artifact".to_string()),
                RemoteStatus::Failed => Err(poll
                    .error
                    .unwrap_or_else(|| "backend reported failure".to_string())),
                RemoteStatus::Cancelled => Err("backend cancelled the generation".to_string()),
            };
            emit(&sink, ProviderEvent::Finished { job_id, outcome });
            return;
        }
    }

    async fn poll(&self, ticket: &str, after: u64) -> anyhow::Result<PollResponse> {
        let response = self
            .client
            .get(self.url(&format!("v1/generations/{}", ticket)))
            .query(&[("after", after)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn cancel_remote(&self, ticket: &str) {
        let result = self
            .client
            .post(self.url(&format!("v1/generations/{}/cancel", ticket)))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => tracing::info!(%ticket, "remote generation cancelled"),
            Err(e) => tracing::warn!(%ticket, error = %e, "remote cancel failed"),
        }
    }
}
