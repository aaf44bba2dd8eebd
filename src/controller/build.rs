use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, trace};

use crate::entity::{BuildContext, BuildProgress, BuildResult, BuildState, Severity};

/// One build lock per host project, created on first use and kept for the
/// lifetime of the process.
static BUILD_LOCKS: Lazy<DashMap<String, Arc<Semaphore>>> = Lazy::new(DashMap::new);

pub fn build_lock(host: &str) -> Arc<Semaphore> {
    BUILD_LOCKS
        .entry(host.to_string())
        .or_insert_with(|| Arc::new(Semaphore::new(1)))
        .clone()
}

/// Serializes builds of one host project and reports their outcome.
///
/// A build goes `Idle -> Waiting -> Running` and ends in exactly one of
/// `Succeeded`, `Failed` or `Canceled`. Its result slot is resolved exactly
/// once, when it reaches the terminal state.
pub struct BuildCoordinator {
    host: String,
    lock: Arc<Semaphore>,
    poll_interval: Duration,
    events: broadcast::Sender<BuildProgress>,
}

impl BuildCoordinator {
    pub fn new(host: impl Into<String>, poll_interval: Duration) -> Self {
        let host = host.into();
        let (events, _) = broadcast::channel(256);
        Self {
            lock: build_lock(&host),
            host,
            poll_interval,
            events,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildProgress> {
        self.events.subscribe()
    }

    /// Whether no build of this host currently holds the lock.
    pub fn is_lock_free(&self) -> bool {
        self.lock.available_permits() > 0
    }

    /// Wait for the host's build lock, polling so cancellation is seen promptly.
    ///
    /// Returns false when the build was canceled before the lock was
    /// acquired; the result slot is then already resolved as canceled and the
    /// caller must not start the build.
    pub async fn wait_and_start(&self, ctx: &BuildContext) -> bool {
        if !ctx.transition(BuildState::Idle, BuildState::Waiting) {
            debug!("{} can't start from {:?}", ctx.id, ctx.state());
            return false;
        }
        trace!("{} waiting for build lock of {}", ctx.id, self.host);
        loop {
            if ctx.is_canceled() {
                ctx.set_state(BuildState::Canceled);
                self.resolve_canceled(ctx);
                return false;
            }
            match tokio::time::timeout(self.poll_interval, self.lock.clone().acquire_owned()).await
            {
                Ok(Ok(permit)) => {
                    *ctx.permit.lock() = Some(permit);
                    ctx.set_state(BuildState::Running);
                    info!("{} started: cargo {}", ctx.id, ctx.task);
                    self.emit(BuildProgress::Started {
                        build_id: ctx.id.clone(),
                        message: format!(
                            "Running cargo {} for {}",
                            ctx.task,
                            ctx.project.presentable_name()
                        ),
                    });
                    return true;
                }
                // the registry never closes its semaphores
                Ok(Err(e)) => {
                    error!("{}: build lock closed: {}", ctx.id, e);
                    ctx.set_state(BuildState::Canceled);
                    self.resolve_canceled(ctx);
                    return false;
                }
                Err(_) => continue,
            }
        }
    }

    /// Cancel a build that has no running process.
    ///
    /// An idle build is finalized here without touching the lock; a waiting
    /// build is finalized by its `wait_and_start`, and a running one by the
    /// `finish` that follows once its process exits.
    pub fn cancel(&self, ctx: &BuildContext) {
        ctx.cancel_token().cancel();
        if ctx.transition(BuildState::Idle, BuildState::Canceled) {
            self.resolve_canceled(ctx);
        }
    }

    pub fn progress(&self, ctx: &BuildContext, message: impl Into<String>) {
        self.emit(BuildProgress::Progress {
            build_id: ctx.id.clone(),
            message: message.into(),
        });
    }

    /// Finalize a started build, release the lock and resolve its result.
    pub fn finish(&self, ctx: &BuildContext, succeeded: bool) -> BuildResult {
        let duration = ctx.mark_finished();
        // dropping the permit wakes the next waiter
        drop(ctx.permit.lock().take());

        let canceled = ctx.is_canceled();
        let (state, severity, message) =
            build_outcome(canceled, succeeded, ctx.error_count(), ctx.warning_count());
        ctx.set_state(state);
        let result = ctx.build_result(succeeded, canceled, message.clone());
        self.resolve(ctx, result.clone());
        info!("{} {:?} in {:?}: {}", ctx.id, state, duration, message);
        self.emit_finished(ctx, &result, severity, duration);
        result
    }

    fn resolve_canceled(&self, ctx: &BuildContext) {
        let duration = ctx.mark_finished();
        let (_, severity, message) = build_outcome(true, false, 0, 0);
        let result = ctx.build_result(false, true, message);
        info!("{} canceled before start", ctx.id);
        self.resolve(ctx, result.clone());
        self.emit_finished(ctx, &result, severity, duration);
    }

    fn resolve(&self, ctx: &BuildContext, result: BuildResult) {
        if let Err(e) = ctx.result_slot().resolve(result) {
            error!("{}: {}", ctx.id, e);
            debug_assert!(false, "{} resolved twice", ctx.id);
        }
    }

    fn emit_finished(
        &self,
        ctx: &BuildContext,
        result: &BuildResult,
        severity: Severity,
        duration: Duration,
    ) {
        self.emit(BuildProgress::Finished {
            build_id: ctx.id.clone(),
            message: result.message.clone(),
            succeeded: result.succeeded,
            canceled: result.canceled,
        });
        self.emit(BuildProgress::Notification {
            build_id: ctx.id.clone(),
            severity,
            message: result.message.clone(),
            duration,
        });
    }

    fn emit(&self, event: BuildProgress) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// Terminal state, severity and message of a build.
///
/// Cancellation beats failure, failure beats diagnostics.
pub fn build_outcome(
    canceled: bool,
    succeeded: bool,
    errors: u32,
    warnings: u32,
) -> (BuildState, Severity, String) {
    if canceled {
        return (BuildState::Canceled, Severity::Info, "Build canceled".to_string());
    }
    if !succeeded {
        return (BuildState::Failed, Severity::Error, "Build failed".to_string());
    }
    let counts = [(errors, "error"), (warnings, "warning")]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, noun)| format!("{n} {noun}{}", if n == 1 { "" } else { "s" }))
        .collect::<Vec<_>>();
    if counts.is_empty() {
        (BuildState::Succeeded, Severity::Info, "Build finished".to_string())
    } else {
        (
            BuildState::Succeeded,
            Severity::Warning,
            format!("Build finished with {}", counts.join(" and ")),
        )
    }
}
