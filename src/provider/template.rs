//! Local provider that renders a markdown document in fixed stages.
//!
//! Output depends only on the project context and the configured stage
//! count, which makes it the provider of choice for dry runs and tests.

use std::time::Duration;

use forge_common::{Artifact, ProgressEvent};
use serde_json::json;

use super::{Acceptance, InvocationRequest, ProjectContext, ProviderEvent, ProviderSink, emit};

const STAGE_NAMES: &[&str] = &["outline", "draft", "refine", "finalize"];

#[derive(Debug, Clone)]
pub struct TemplateProvider {
    stages: u32,
    step_delay: Duration,
}

impl Default for TemplateProvider {
    fn default() -> Self {
        Self {
            stages: STAGE_NAMES.len() as u32,
            step_delay: Duration::from_millis(250),
        }
    }
}

impl TemplateProvider {
    pub fn new(stages: u32, step_delay: Duration) -> Self {
        Self {
            stages: stages.max(1),
            step_delay,
        }
    }

    /// Accept immediately and render on a background task.
    pub fn invoke(&self, request: InvocationRequest, sink: ProviderSink) -> Acceptance {
        let ticket = format!("template-{}", request.job_id);
        let provider = self.clone();
        tokio::spawn(async move { provider.render(request, sink).await });
        Acceptance { ticket }
    }

    async fn render(self, request: InvocationRequest, sink: ProviderSink) {
        let InvocationRequest {
            job_id,
            context,
            cancel,
        } = request;

        for stage in 1..=self.stages {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(job_id, stage, "template render cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.step_delay) => {}
            }

            let event = ProgressEvent::new(
                job_id,
                u64::from(stage),
                stage_name(stage),
                f64::from(stage) / f64::from(self.stages),
            );
            if !emit(&sink, ProviderEvent::Progress(event)) {
                return;
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        emit(
            &sink,
            ProviderEvent::Finished {
                job_id,
                outcome: Ok(self.artifact(&context)),
            },
        );
    }

    /// The document this provider produces for a project.
    pub fn artifact(&self, context: &ProjectContext) -> Artifact {
        let mut content = format!("# {}\n\n", context.project_name);
        for stage in 1..=self.stages {
            content.push_str(&format!(
                "## {}\n\nGenerated {} section for {} (attempt {}).\n\n",
                capitalize(&stage_name(stage)),
                stage_name(stage),
                context.project_name,
                context.attempt
            ));
        }

        Artifact::new(
            format!("{}.md", slugify(&context.project_name)),
            "text/markdown",
            content.trim_end().to_string(),
        )
        .with_metadata("provider", json!("template"))
        .with_metadata("stages", json!(self.stages))
        .with_metadata("attempt", json!(context.attempt))
    }
}

fn stage_name(stage: u32) -> String {
    STAGE_NAMES
        .get(stage as usize - 1)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("stage {}", stage))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Lowercase, dash-separated file stem.
pub fn slugify(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "artifact".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::provider_channel;
    use tokio_util::sync::CancellationToken;

    fn context() -> ProjectContext {
        ProjectContext {
            project_id: 1,
            project_name: "Launch Plan".into(),
            attempt: 1,
        }
    }

    fn request(cancel: CancellationToken) -> InvocationRequest {
        InvocationRequest {
            job_id: 9,
            context: context(),
            cancel,
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Launch Plan!"), "launch-plan");
        assert_eq!(slugify("  --  "), "artifact");
    }

    #[test]
    fn test_stage_names_fall_back_to_numbers() {
        assert_eq!(stage_name(1), "outline");
        assert_eq!(stage_name(4), "finalize");
        assert_eq!(stage_name(6), "stage 6");
    }

    #[test]
    fn test_artifact_is_deterministic() {
        let provider = TemplateProvider::new(2, Duration::ZERO);
        let a = provider.artifact(&context());
        let b = provider.artifact(&context());
        assert_eq!(a, b);
        assert_eq!(a.name, "launch-plan.md");
        assert_eq!(a.media_type, "text/markdown");
        assert!(a.content.starts_with("# Launch Plan"));
        assert!(a.content.contains("## Outline"));
        assert!(a.content.contains("## Draft"));
        assert!(!a.content.contains("## Refine"));
    }

    #[tokio::test]
    async fn test_emits_stages_then_artifact() {
        let provider = TemplateProvider::new(3, Duration::ZERO);
        let (sink, mut events) = provider_channel();
        let acceptance = provider.invoke(request(CancellationToken::new()), sink);
        assert_eq!(acceptance.ticket, "template-9");

        let mut sequences = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                ProviderEvent::Progress(event) => {
                    assert_eq!(event.job_id, 9);
                    sequences.push(event.sequence);
                    if event.sequence == 3 {
                        assert_eq!(event.fraction, 1.0);
                    }
                }
                ProviderEvent::Finished { job_id, outcome } => {
                    assert_eq!(job_id, 9);
                    assert!(outcome.is_ok());
                    break;
                }
            }
        }
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_emits_nothing() {
        let provider = TemplateProvider::new(3, Duration::from_millis(50));
        let (sink, mut events) = provider_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        provider.invoke(request(cancel), sink);
        assert!(events.recv().await.is_none());
    }
}
