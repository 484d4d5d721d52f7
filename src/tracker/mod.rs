//! Per-job progress accumulation.
//!
//! The tracker is the authority on progress ordering: an event is accepted
//! only when its sequence number is exactly one past the last recorded one
//! for the same job. Recorded events are never rewritten.

use std::collections::HashMap;

use forge_common::{ForgeError, ForgeResult, JobId, ProgressEvent, ProgressSnapshot};

#[derive(Debug, Default)]
pub struct ProgressTracker {
    jobs: HashMap<JobId, Vec<ProgressEvent>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` to the job's history.
    ///
    /// Fails with `OutOfOrderProgress` when the sequence number is not
    /// `last_sequence(job_id) + 1`, and with `InvalidProgress` when the event
    /// belongs to another job or its fraction is outside `[0, 1]`. A rejected
    /// event leaves the tracker unchanged.
    pub fn record(&mut self, job_id: JobId, event: ProgressEvent) -> ForgeResult<&ProgressEvent> {
        if event.job_id != job_id {
            return Err(ForgeError::InvalidProgress {
                job_id,
                reason: format!("event is addressed to job {}", event.job_id),
            });
        }
        if !event.fraction.is_finite() || !(0.0..=1.0).contains(&event.fraction) {
            return Err(ForgeError::InvalidProgress {
                job_id,
                reason: format!("fraction {} is outside [0, 1]", event.fraction),
            });
        }

        let expected = self.last_sequence(job_id) + 1;
        if event.sequence != expected {
            return Err(ForgeError::OutOfOrderProgress {
                job_id,
                expected,
                received: event.sequence,
            });
        }

        let events = self.jobs.entry(job_id).or_default();
        events.push(event);
        Ok(&events[events.len() - 1])
    }

    /// Sequence number of the latest recorded event, 0 when none.
    pub fn last_sequence(&self, job_id: JobId) -> u64 {
        self.jobs
            .get(&job_id)
            .and_then(|events| events.last())
            .map(|e| e.sequence)
            .unwrap_or(0)
    }

    pub fn current_progress(&self, job_id: JobId) -> ProgressSnapshot {
        match self.jobs.get(&job_id).and_then(|events| events.last()) {
            Some(event) => ProgressSnapshot::from(event),
            None => ProgressSnapshot::NotStarted,
        }
    }

    pub fn events(&self, job_id: JobId) -> &[ProgressEvent] {
        self.jobs.get(&job_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reload a job's history, e.g. from persisted records. Replaces whatever
    /// was held for that job.
    pub fn restore(&mut self, job_id: JobId, events: Vec<ProgressEvent>) {
        if events.is_empty() {
            self.jobs.remove(&job_id);
        } else {
            self.jobs.insert(job_id, events);
        }
    }

    pub fn forget(&mut self, job_id: JobId) {
        self.jobs.remove(&job_id);
    }
}
