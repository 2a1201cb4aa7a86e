//! Job records and their status state machine.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle of a migration job.
///
/// Transitions only move forward; `Failed` can be entered from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Analyzing,
    Migrating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Migrating => "migrating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a job's status, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: u8,
    pub logs: Vec<String>,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    progress: u8,
    logs: Vec<String>,
    finished_at: Option<DateTime<Utc>>,
    /// A poller has seen the terminal status.
    observed: bool,
}

/// One migration job. Mutable fields sit behind a short-held lock that is
/// never held across an `.await`.
#[derive(Debug)]
pub struct JobRecord {
    id: String,
    source_ref: String,
    target: String,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    done: CancellationToken,
    state: Mutex<JobState>,
}

impl JobRecord {
    /// New `pending` job. `target` is the redacted connection string.
    pub fn new(id: impl Into<String>, source_ref: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_ref: source_ref.into(),
            target: target.into(),
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                progress: 0,
                logs: Vec::new(),
                finished_at: None,
                observed: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Token the job's workers watch between batches.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn request_cancel(&self) {
        // Cancel under the state lock so no progress update lands after it.
        let _state = self.lock();
        if !self.cancel.is_cancelled() {
            info!(job_id = %self.id, "Cancellation requested");
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job reaches a terminal status.
    pub async fn finished(&self) {
        self.done.cancelled().await
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        // A poisoned lock only means a writer panicked mid-update; the
        // state itself is still a valid snapshot.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// Append a log entry and emit it as a tracing event.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!(job_id = %self.id, "{}", message);
        self.lock().logs.push(message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = format!("WARNING: {}", message.into());
        warn!(job_id = %self.id, "{}", message);
        self.lock().logs.push(message);
    }

    /// Move forward to `status`. Backward moves and moves out of a terminal
    /// state are ignored.
    pub fn advance(&self, status: JobStatus) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() || status <= state.status || status.is_terminal() {
            return false;
        }
        state.status = status;
        drop(state);
        info!(job_id = %self.id, "Status: {}", status);
        true
    }

    /// Raise progress. Values never decrease, stay below 100 until the job
    /// completes, and freeze once cancellation is requested.
    pub fn set_progress(&self, progress: u8) {
        let mut state = self.lock();
        if state.status.is_terminal() || self.cancel.is_cancelled() {
            return;
        }
        state.progress = state.progress.max(progress.min(99));
    }

    /// Terminal success with a final log entry.
    pub fn complete(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = JobStatus::Completed;
            state.progress = 100;
            state.logs.push(message.clone());
            state.finished_at = Some(Utc::now());
        }
        info!(job_id = %self.id, "{}", message);
        self.done.cancel();
    }

    /// Terminal failure with a log entry naming the cause.
    pub fn fail(&self, cause: impl Into<String>) {
        let message = format!("ERROR: {}", cause.into());
        {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = JobStatus::Failed;
            state.logs.push(message.clone());
            state.finished_at = Some(Utc::now());
        }
        error!(job_id = %self.id, "{}", message);
        self.done.cancel();
    }

    /// Copy the pollable fields. Marks a terminal job as observed.
    pub fn snapshot(&self) -> JobSnapshot {
        let mut state = self.lock();
        if state.status.is_terminal() {
            state.observed = true;
        }
        JobSnapshot {
            status: state.status,
            progress: state.progress,
            logs: state.logs.clone(),
        }
    }

    /// Terminal, seen by a poller, and finished before `cutoff`.
    pub fn is_collectable(&self, cutoff: DateTime<Utc>) -> bool {
        let state = self.lock();
        state.observed && state.finished_at.is_some_and(|t| t <= cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobRecord {
        JobRecord::new("job-1", "file-1", "u@h:3306/db")
    }

    #[test]
    fn test_status_only_moves_forward() {
        let job = job();
        assert!(job.advance(JobStatus::Analyzing));
        assert!(job.advance(JobStatus::Migrating));
        assert!(!job.advance(JobStatus::Analyzing));
        // Terminal states are entered through complete/fail only.
        assert!(!job.advance(JobStatus::Completed));
        assert_eq!(job.status(), JobStatus::Migrating);
    }

    #[test]
    fn test_progress_monotonic_and_capped() {
        let job = job();
        job.set_progress(40);
        job.set_progress(20);
        assert_eq!(job.snapshot().progress, 40);
        job.set_progress(100);
        assert_eq!(job.snapshot().progress, 99);
        job.complete("done");
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress, 100);
    }

    #[test]
    fn test_progress_frozen_after_cancel() {
        let job = job();
        job.set_progress(30);
        job.request_cancel();
        job.set_progress(60);
        job.fail("Migration cancelled");
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.progress, 30);
        assert_eq!(snap.logs.last().unwrap(), "ERROR: Migration cancelled");
    }

    #[test]
    fn test_terminal_state_is_final() {
        let job = job();
        job.fail("boom");
        job.complete("late");
        job.fail("again");
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.logs, vec!["ERROR: boom".to_string()]);
    }

    #[test]
    fn test_collectable_only_after_observed() {
        let job = job();
        job.complete("ok");
        let later = Utc::now() + chrono::Duration::seconds(1);
        assert!(!job.is_collectable(later));
        job.snapshot();
        assert!(job.is_collectable(later));
    }

    #[test]
    fn test_snapshot_serializes_lowercase_status() {
        let job = job();
        job.log("hello");
        let json = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "pending", "progress": 0, "logs": ["hello"]})
        );
    }

    #[tokio::test]
    async fn test_finished_resolves_on_terminal() {
        let job = std::sync::Arc::new(job());
        let waiter = {
            let job = job.clone();
            tokio::spawn(async move { job.finished().await })
        };
        job.complete("ok");
        waiter.await.unwrap();
    }
}
