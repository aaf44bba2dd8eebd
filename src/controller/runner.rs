use std::{
    path::PathBuf,
    process::Stdio,
    sync::Arc,
};

use build_output::{strip_ansi, BuildEvent, BuildOutputInterpreter, DiagnosticLevel, Stream};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::entity::{BuildContext, BuildResult, Project};

use super::build::BuildCoordinator;

const MESSAGE_FORMAT: &str = "--message-format=json-diagnostic-rendered-ansi";

/// A fully composed build process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
}

impl BuildCommand {
    /// `cargo <task> --message-format=... --manifest-path <manifest>`.
    ///
    /// `task` may carry extra arguments (`"build --release"`). Test builds
    /// compile the tests without running them.
    pub fn cargo(cargo_path: &str, ctx: &BuildContext) -> Self {
        let mut words = ctx.task.split_whitespace();
        let subcommand = words.next().unwrap_or("build");
        let mut args = Vec::new();
        if ctx.is_test_build {
            args.extend(["test".to_string(), "--no-run".to_string()]);
        } else {
            args.push(subcommand.to_string());
        }
        args.extend(words.map(str::to_string));
        args.push(MESSAGE_FORMAT.to_string());
        args.push("--manifest-path".to_string());
        args.push(ctx.project.manifest.to_string());
        Self {
            program: cargo_path.to_string(),
            args,
            current_dir: ctx.project.root_dir().to_path_buf(),
        }
    }
}

/// Runs cargo builds through a [`BuildCoordinator`].
pub struct BuildRunner {
    coordinator: Arc<BuildCoordinator>,
    cargo_path: String,
}

impl BuildRunner {
    pub fn new(coordinator: Arc<BuildCoordinator>, cargo_path: impl Into<String>) -> Self {
        Self {
            coordinator,
            cargo_path: cargo_path.into(),
        }
    }

    pub fn coordinator(&self) -> &Arc<BuildCoordinator> {
        &self.coordinator
    }

    /// Build `project` and wait for the structured result.
    ///
    /// Canceling `cancel` abandons a waiting build or kills a running one.
    pub async fn submit(
        &self,
        project: Project,
        task: &str,
        is_test_build: bool,
        cancel: &CancellationToken,
    ) -> BuildResult {
        let ctx = BuildContext::new(project, task, is_test_build).with_parent_cancel(cancel);
        let command = BuildCommand::cargo(&self.cargo_path, &ctx);
        self.run(&ctx, &command).await
    }

    pub async fn run(&self, ctx: &BuildContext, command: &BuildCommand) -> BuildResult {
        if !self.coordinator.wait_and_start(ctx).await {
            return ctx.wait_result().await;
        }
        let succeeded = match self.run_process(ctx, command).await {
            Ok(succeeded) => succeeded,
            Err(e) => {
                error!("{}: failed to run {}: {}", ctx.id, command.program, e);
                self.coordinator
                    .progress(ctx, format!("failed to run {}: {}", command.program, e));
                false
            }
        };
        self.coordinator.finish(ctx, succeeded)
    }

    #[tracing::instrument(name = "build", skip_all, fields(id = %ctx.id))]
    async fn run_process(
        &self,
        ctx: &BuildContext,
        command: &BuildCommand,
    ) -> Result<bool, std::io::Error> {
        debug!("spawning {} {:?}", command.program, command.args);
        let mut child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.current_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

        let mut interpreter = BuildOutputInterpreter::new();
        let mut out_buf = [0u8; 8192];
        let mut err_buf = [0u8; 8192];
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                _ = ctx.cancel_token().cancelled() => {
                    info!("{} canceled, killing cargo", ctx.id);
                    if let Err(e) = child.start_kill() {
                        warn!("failed to kill build process: {}", e);
                    }
                    // rustc children may still hold the pipes open
                    break;
                }
                read = stdout.read(&mut out_buf), if stdout_open => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        let events = interpreter.feed(Stream::Stdout, &out_buf[..n]);
                        self.handle_events(ctx, events);
                    }
                    Err(e) => {
                        warn!("reading build stdout: {}", e);
                        stdout_open = false;
                    }
                },
                read = stderr.read(&mut err_buf), if stderr_open => match read {
                    Ok(0) => stderr_open = false,
                    Ok(n) => {
                        let events = interpreter.feed(Stream::Stderr, &err_buf[..n]);
                        self.handle_events(ctx, events);
                    }
                    Err(e) => {
                        warn!("reading build stderr: {}", e);
                        stderr_open = false;
                    }
                },
            }
        }
        let events = interpreter.end_of_stream();
        self.handle_events(ctx, events);

        let status = child.wait().await?;
        let succeeded = status.success() && !ctx.is_canceled();
        debug!("build process exited with {}", status);

        let mut artifacts: Vec<_> = interpreter.finish(succeeded).into_values().collect();
        artifacts.sort_by(|a, b| {
            (&a.target.package_id, &a.target.target_name)
                .cmp(&(&b.target.package_id, &b.target.target_name))
        });
        ctx.set_artifacts(artifacts);
        Ok(succeeded)
    }

    fn handle_events(&self, ctx: &BuildContext, events: Vec<BuildEvent>) {
        for event in events {
            match event {
                BuildEvent::Output(line) => self.coordinator.progress(ctx, line),
                BuildEvent::Diagnostic(diagnostic) => {
                    match diagnostic.level {
                        DiagnosticLevel::Error => ctx.add_error(),
                        DiagnosticLevel::Warning => ctx.add_warning(),
                    }
                    if let Some(rendered) = diagnostic.rendered {
                        self.coordinator.progress(ctx, strip_ansi(&rendered));
                    }
                }
                BuildEvent::Artifact(artifact) => {
                    trace!("{} produced {:?}", artifact.target.target_name, artifact.filenames);
                }
                BuildEvent::BuildScriptExecuted { package_id } => {
                    trace!("build script of {} executed", package_id);
                }
                BuildEvent::Finished { success } => {
                    debug!("cargo reported build-finished success={}", success);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::entity::{BuildProgress, BuildState, CanonicalPath};

    fn project() -> Project {
        Project::new(CanonicalPath::lossy("/ws/app/Cargo.toml"))
    }

    #[test]
    fn test_cargo_command_line() {
        let ctx = BuildContext::new(project(), "build --release", false);
        let command = BuildCommand::cargo("cargo", &ctx);
        assert_eq!(
            command.args,
            vec![
                "build",
                "--release",
                MESSAGE_FORMAT,
                "--manifest-path",
                "/ws/app/Cargo.toml"
            ]
        );
        assert_eq!(command.current_dir, PathBuf::from("/ws/app"));

        let ctx = BuildContext::new(project(), "build", true);
        let command = BuildCommand::cargo("cargo", &ctx);
        assert_eq!(&command.args[..2], &["test", "--no-run"]);
    }

    fn coordinator(host: &str) -> Arc<BuildCoordinator> {
        Arc::new(BuildCoordinator::new(host, Duration::from_millis(10)))
    }

    #[cfg(unix)]
    fn shell(script: &str) -> BuildCommand {
        BuildCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            current_dir: std::env::temp_dir(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_counts_warnings_from_both_streams() {
        let coordinator = coordinator("runner-ok-host");
        let mut events = coordinator.subscribe();
        let runner = BuildRunner::new(coordinator, "cargo");
        let ctx = BuildContext::new(project(), "build", false);
        let command = shell("printf 'Compiling foo\\n'; printf 'warning: unused\\n' >&2; exit 0");

        let result = runner.run(&ctx, &command).await;
        assert!(result.succeeded);
        assert_eq!(result.warning_count, 1);
        assert_eq!(result.error_count, 0);
        assert_eq!(result.message, "Build finished with 1 warning");
        assert_eq!(ctx.state(), BuildState::Succeeded);

        let mut progress = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let BuildProgress::Progress { message, .. } = event {
                progress.push(message);
            }
        }
        progress.sort();
        assert_eq!(progress, vec!["Compiling foo", "warning: unused"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_process_reports_errors() {
        let coordinator = coordinator("runner-fail-host");
        let runner = BuildRunner::new(coordinator, "cargo");
        let ctx = BuildContext::new(project(), "build", false);
        let command = shell("echo 'error[E0425]: cannot find value' >&2; exit 101");

        let result = runner.run(&ctx, &command).await;
        assert!(!result.succeeded);
        assert!(!result.canceled);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.message, "Build failed");
        assert!(result.artifacts.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_running_process() {
        let coordinator = coordinator("runner-cancel-host");
        let runner = BuildRunner::new(coordinator.clone(), "cargo");
        let ctx = BuildContext::new(project(), "build", false);
        let command = shell("exec sleep 30");

        let token = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let result = tokio::time::timeout(Duration::from_secs(10), runner.run(&ctx, &command))
            .await
            .unwrap();
        assert!(result.canceled);
        assert_eq!(result.message, "Build canceled");
        assert!(coordinator.is_lock_free());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_does_not_wait_for_grandchildren() {
        let coordinator = coordinator("runner-grandchild-host");
        let runner = BuildRunner::new(coordinator.clone(), "cargo");
        let ctx = BuildContext::new(project(), "build", false);
        // the shell forks `sleep`, which inherits stdout and stderr
        let command = shell("sleep 5; true");

        let token = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let started = std::time::Instant::now();
        let result = runner.run(&ctx, &command).await;
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "cancel took {:?}",
            started.elapsed()
        );
        assert!(result.canceled);
        assert_eq!(ctx.state(), BuildState::Canceled);
        assert!(coordinator.is_lock_free());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_a_failed_build() {
        let coordinator = coordinator("runner-spawn-host");
        let runner = BuildRunner::new(coordinator, "/nonexistent/cargo-workbench-cargo");
        let cancel = CancellationToken::new();

        let result = runner.submit(project(), "build", false, &cancel).await;
        assert!(!result.succeeded);
        assert_eq!(result.message, "Build failed");
    }

    #[tokio::test]
    async fn test_submit_canceled_before_start() {
        let coordinator = coordinator("runner-precancel-host");
        let runner = BuildRunner::new(coordinator, "cargo");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runner.submit(project(), "build", false, &cancel).await;
        assert!(result.canceled);
        assert!(runner.coordinator().is_lock_free());
    }
}
