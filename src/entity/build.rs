use std::{
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime},
};

use build_output::Artifact;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;

use super::Project;

static NEXT_BUILD_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildState {
    Idle,
    Waiting,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildState::Succeeded | BuildState::Failed | BuildState::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Final, structured outcome of one build request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub build_id: String,
    pub succeeded: bool,
    pub canceled: bool,
    pub started_at: SystemTime,
    pub duration_ms: u64,
    pub error_count: u32,
    pub warning_count: u32,
    pub message: String,
    /// Produced artifacts, empty unless the build succeeded
    pub artifacts: Vec<Artifact>,
}

/// Events for progress consumers, keyed by build id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BuildProgress {
    Started {
        build_id: String,
        message: String,
    },
    Progress {
        build_id: String,
        message: String,
    },
    Finished {
        build_id: String,
        message: String,
        succeeded: bool,
        canceled: bool,
    },
    /// User-visible notification emitted once per finished build
    Notification {
        build_id: String,
        severity: Severity,
        message: String,
        duration: Duration,
    },
}

impl BuildProgress {
    pub fn build_id(&self) -> &str {
        match self {
            BuildProgress::Started { build_id, .. }
            | BuildProgress::Progress { build_id, .. }
            | BuildProgress::Finished { build_id, .. }
            | BuildProgress::Notification { build_id, .. } => build_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultSlotError {
    #[error("build result was already resolved")]
    AlreadyResolved,
}

/// Write-once result cell. Readers may wait for it from any task.
#[derive(Debug)]
pub struct ResultSlot {
    tx: watch::Sender<Option<BuildResult>>,
}

impl Default for ResultSlot {
    fn default() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }
}

impl ResultSlot {
    pub fn resolve(&self, result: BuildResult) -> Result<(), ResultSlotError> {
        let mut result = Some(result);
        let resolved = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = result.take();
            true
        });
        if resolved {
            Ok(())
        } else {
            Err(ResultSlotError::AlreadyResolved)
        }
    }

    pub fn get(&self) -> Option<BuildResult> {
        self.tx.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the slot is resolved.
    pub async fn wait(&self) -> BuildResult {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            // the sender lives as long as `self`, so this can't fail
            let _ = rx.changed().await;
        }
    }
}

/// State of one build invocation.
///
/// Only the coordinator and the output interpreter of this build mutate it,
/// through interior mutability; once the result slot is resolved it no
/// longer changes.
#[derive(Debug)]
pub struct BuildContext {
    pub id: String,
    /// Snapshot of the project taken when the build was requested
    pub project: Project,
    pub task: String,
    pub is_test_build: bool,
    pub started_at: SystemTime,
    started: Instant,
    finished: Mutex<Option<Instant>>,
    errors: AtomicU32,
    warnings: AtomicU32,
    state: Mutex<BuildState>,
    cancel: CancellationToken,
    pub(crate) permit: Mutex<Option<OwnedSemaphorePermit>>,
    artifacts: Mutex<Vec<Artifact>>,
    result: ResultSlot,
}

impl BuildContext {
    pub fn new(project: Project, task: impl Into<String>, is_test_build: bool) -> Self {
        let id = format!("build-{}", NEXT_BUILD_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            project,
            task: task.into(),
            is_test_build,
            started_at: SystemTime::now(),
            started: Instant::now(),
            finished: Mutex::new(None),
            errors: AtomicU32::new(0),
            warnings: AtomicU32::new(0),
            state: Mutex::new(BuildState::Idle),
            cancel: CancellationToken::new(),
            permit: Mutex::new(None),
            artifacts: Mutex::new(Vec::new()),
            result: ResultSlot::default(),
        }
    }

    /// Cancel this build whenever `parent` is canceled.
    pub fn with_parent_cancel(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn state(&self) -> BuildState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: BuildState) {
        *self.state.lock() = state;
    }

    /// Move to `to` only if the build is currently in `from`.
    pub(crate) fn transition(&self, from: BuildState, to: BuildState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn warning_count(&self) -> u32 {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_artifacts(&self, artifacts: Vec<Artifact>) {
        *self.artifacts.lock() = artifacts;
    }

    /// Record the end time once; later calls keep the first timestamp.
    pub(crate) fn mark_finished(&self) -> Duration {
        let mut finished = self.finished.lock();
        let end = *finished.get_or_insert_with(Instant::now);
        end.duration_since(self.started)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.finished
            .lock()
            .map(|end| end.duration_since(self.started))
    }

    pub fn holds_lock(&self) -> bool {
        self.permit.lock().is_some()
    }

    pub(crate) fn result_slot(&self) -> &ResultSlot {
        &self.result
    }

    pub fn result(&self) -> Option<BuildResult> {
        self.result.get()
    }

    pub async fn wait_result(&self) -> BuildResult {
        self.result.wait().await
    }

    pub(crate) fn build_result(&self, succeeded: bool, canceled: bool, message: String) -> BuildResult {
        let duration = self.duration().unwrap_or_default();
        let artifacts = if succeeded && !canceled {
            self.artifacts.lock().clone()
        } else {
            Vec::new()
        };
        BuildResult {
            build_id: self.id.clone(),
            succeeded: succeeded && !canceled,
            canceled,
            started_at: self.started_at,
            duration_ms: duration.as_millis() as u64,
            error_count: self.error_count(),
            warning_count: self.warning_count(),
            message,
            artifacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::entity::CanonicalPath;

    fn result(id: &str) -> BuildResult {
        BuildResult {
            build_id: id.to_string(),
            succeeded: true,
            canceled: false,
            started_at: SystemTime::UNIX_EPOCH,
            duration_ms: 0,
            error_count: 0,
            warning_count: 0,
            message: "Build finished".to_string(),
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_result_slot_is_write_once() {
        let slot = ResultSlot::default();
        assert!(!slot.is_resolved());
        assert_eq!(slot.resolve(result("first")), Ok(()));
        assert_eq!(
            slot.resolve(result("second")),
            Err(ResultSlotError::AlreadyResolved)
        );
        assert_eq!(slot.get().unwrap().build_id, "first");
    }

    #[tokio::test]
    async fn test_result_slot_wakes_every_waiter() {
        let slot = Arc::new(ResultSlot::default());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let slot = slot.clone();
                tokio::spawn(async move { slot.wait().await })
            })
            .collect();
        tokio::task::yield_now().await;
        slot.resolve(result("shared")).unwrap();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().build_id, "shared");
        }
    }

    #[test]
    fn test_context_ids_are_unique() {
        let project = Project::new(CanonicalPath::lossy("/ws/Cargo.toml"));
        let a = BuildContext::new(project.clone(), "build", false);
        let b = BuildContext::new(project, "build", false);
        assert_ne!(a.id, b.id);
        assert_eq!(a.state(), BuildState::Idle);
        assert!(a.duration().is_none());
    }
}
