use crate::orchestrator::ForgeEvent;
use crate::ui::icons::{CHECK, CLOCK, CROSS, PROGRESS, REVIEW, RUNNING, STOP};
use console::style;
use forge_common::{JobId, JobState, QualityVerdict, Severity};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for a single job run by `forge run`, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Progress bar — percentage reported by the provider
/// - Status spinner — current job state and stage
///
/// Both hide themselves when stderr is not a terminal, so piping `forge run`
/// only loses the animation, not the final summary lines.
pub struct JobProgressUI {
    multi: MultiProgress,
    progress_bar: ProgressBar,
    status_bar: ProgressBar,
    job_id: JobId,
    verbose: bool,
}

impl JobProgressUI {
    /// Create the UI for `job_id`.
    ///
    /// # Arguments
    /// * `job_id` — events for other jobs are ignored
    /// * `provider` — provider name shown as the bar prefix
    /// * `verbose` — when `true`, every progress event is also printed
    pub fn new(job_id: JobId, provider: &str, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let bar_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let progress_bar = multi.add(ProgressBar::new(100));
        progress_bar.set_style(bar_style);
        progress_bar.set_prefix(provider.to_string());

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix(format!("Job {}", job_id));
        status_bar.set_message(format!("{}waiting for provider", RUNNING));
        status_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            progress_bar,
            status_bar,
            job_id,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Update the bars from one orchestrator notification.
    pub fn handle(&self, event: &ForgeEvent) {
        if event.job_id() != Some(self.job_id) {
            return;
        }

        match event {
            ForgeEvent::JobProgress {
                sequence,
                stage,
                fraction,
                message,
                ..
            } => {
                let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u64;
                self.progress_bar.set_position(percent);
                self.progress_bar.set_message(style(stage).cyan().to_string());
                if self.verbose {
                    let detail = message
                        .as_deref()
                        .map(|m| format!(" - {}", m))
                        .unwrap_or_default();
                    self.print_line(format!(
                        "    {} #{} {} {}%{}",
                        PROGRESS,
                        sequence,
                        stage,
                        percent,
                        style(detail).dim()
                    ));
                }
            }
            ForgeEvent::JobStateChanged { to, reason, .. } => {
                self.status_bar.set_message(state_label(*to));
                if let Some(reason) = reason
                    && self.verbose
                {
                    self.print_line(format!("    {} {}", style("→").dim(), style(reason).dim()));
                }
            }
            ForgeEvent::JobArtifactReady {
                name, media_type, ..
            } => {
                self.print_line(format!(
                    "    {} artifact {} {}",
                    REVIEW,
                    style(name).bold(),
                    style(format!("({})", media_type)).dim()
                ));
            }
            _ => {}
        }
    }

    /// Stop both bars and print the final state.
    pub fn finish(&self, state: JobState, reason: Option<&str>) {
        if state == JobState::Completed {
            self.progress_bar.set_position(100);
        }
        self.progress_bar.abandon();
        let line = match (state, reason) {
            (JobState::Completed, _) => format!("{}Job {} completed", CHECK, self.job_id),
            (JobState::Cancelled, _) => format!("{}Job {} cancelled", STOP, self.job_id),
            (_, Some(reason)) => format!("{}Job {} {}: {}", CROSS, self.job_id, state, reason),
            (_, None) => format!("{}Job {} {}", CROSS, self.job_id, state),
        };
        self.status_bar.finish_with_message(line);
    }
}

fn state_label(state: JobState) -> String {
    match state {
        JobState::Created | JobState::Running => format!("{}running", RUNNING),
        JobState::Evaluating => format!("{}evaluating artifact", REVIEW),
        JobState::Completed => format!("{}completed", CHECK),
        JobState::Failed => format!("{}failed", CROSS),
        JobState::Cancelled => format!("{}cancelled", STOP),
    }
}

/// Render a verdict for the terminal, one finding per line.
pub fn format_verdict(verdict: &QualityVerdict) -> String {
    let headline = if verdict.passed {
        style(verdict.summary()).green().bold()
    } else {
        style(verdict.summary()).red().bold()
    };
    let mut out = format!("{} Quality gate: {}", CLOCK, headline);
    for finding in &verdict.findings {
        let text = match finding.severity {
            Severity::Error => style(finding.to_string()).red(),
            Severity::Warning => style(finding.to_string()).yellow(),
            Severity::Info => style(finding.to_string()).dim(),
        };
        out.push_str(&format!("\n  {} {}", finding.severity.emoji(), text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forge_common::Finding;

    #[test]
    fn test_format_verdict_lists_findings() {
        let verdict = QualityVerdict::from_findings(
            1,
            vec![
                Finding::new(Severity::Error, "length", "too short"),
                Finding::new(Severity::Info, "tone", "consider a summary"),
            ],
            Utc::now(),
        );
        let text = console::strip_ansi_codes(&format_verdict(&verdict)).to_string();
        assert!(text.contains("FAIL"));
        assert!(text.contains("[length] too short"));
        assert!(text.contains("consider a summary"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_handle_ignores_other_jobs() {
        let ui = JobProgressUI::new(1, "template", false);
        ui.handle(&ForgeEvent::JobProgress {
            project_id: 1,
            job_id: 2,
            sequence: 1,
            stage: "draft".into(),
            fraction: 0.5,
            message: None,
        });
        assert_eq!(ui.progress_bar.position(), 0);

        ui.handle(&ForgeEvent::JobProgress {
            project_id: 1,
            job_id: 1,
            sequence: 1,
            stage: "draft".into(),
            fraction: 0.5,
            message: None,
        });
        assert_eq!(ui.progress_bar.position(), 50);
        ui.finish(JobState::Completed, None);
        assert_eq!(ui.progress_bar.position(), 100);
    }
}
