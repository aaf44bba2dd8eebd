use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Output,
};

use futures::future::BoxFuture;
use metadata_parser::{parse_metadata, MetadataError, RawMetadata};
use thiserror::Error;
use tracing::{debug, error};

use crate::entity::RustcInfo;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("unexpected output from `{program}`: {output}")]
    UnexpectedOutput { program: String, output: String },
}

/// The external tools a refresh depends on.
///
/// Implemented by [`CargoToolchain`] for real processes; tests substitute
/// canned answers.
pub trait Toolchain: Send + Sync {
    /// Raw `cargo metadata` for the project rooted at `manifest`.
    fn metadata<'a>(
        &'a self,
        manifest: &'a Path,
    ) -> BoxFuture<'a, Result<RawMetadata, ToolchainError>>;

    fn rustc_info(&self) -> BoxFuture<'_, Result<RustcInfo, ToolchainError>>;

    fn sysroot(&self) -> BoxFuture<'_, Result<PathBuf, ToolchainError>>;
}

#[derive(Debug, Clone)]
pub struct CargoToolchain {
    cargo_path: String,
    rustc_path: String,
}

impl CargoToolchain {
    pub fn new(cargo_path: impl Into<String>, rustc_path: impl Into<String>) -> Self {
        Self {
            cargo_path: cargo_path.into(),
            rustc_path: rustc_path.into(),
        }
    }

    #[tracing::instrument(name = "cargo_metadata", level = "debug", skip(self))]
    async fn run_metadata(&self, manifest: &Path) -> Result<RawMetadata, ToolchainError> {
        let output = run(
            &self.cargo_path,
            &[
                OsStr::new("metadata"),
                OsStr::new("--format-version"),
                OsStr::new("1"),
                OsStr::new("--manifest-path"),
                manifest.as_os_str(),
            ],
            manifest.parent(),
        )
        .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_metadata(&stdout)?)
    }

    async fn run_rustc_info(&self) -> Result<RustcInfo, ToolchainError> {
        let output = run(&self.rustc_path, &[OsStr::new("-vV")], None).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        RustcInfo::parse(&stdout).ok_or_else(|| ToolchainError::UnexpectedOutput {
            program: self.rustc_path.clone(),
            output: stdout.into_owned(),
        })
    }

    async fn run_sysroot(&self) -> Result<PathBuf, ToolchainError> {
        let output = run(
            &self.rustc_path,
            &[OsStr::new("--print"), OsStr::new("sysroot")],
            None,
        )
        .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let sysroot = stdout.trim();
        if sysroot.is_empty() {
            return Err(ToolchainError::UnexpectedOutput {
                program: self.rustc_path.clone(),
                output: String::new(),
            });
        }
        Ok(PathBuf::from(sysroot))
    }
}

impl Toolchain for CargoToolchain {
    fn metadata<'a>(
        &'a self,
        manifest: &'a Path,
    ) -> BoxFuture<'a, Result<RawMetadata, ToolchainError>> {
        Box::pin(self.run_metadata(manifest))
    }

    fn rustc_info(&self) -> BoxFuture<'_, Result<RustcInfo, ToolchainError>> {
        Box::pin(self.run_rustc_info())
    }

    fn sysroot(&self) -> BoxFuture<'_, Result<PathBuf, ToolchainError>> {
        Box::pin(self.run_sysroot())
    }
}

async fn run(
    program: &str,
    args: &[&OsStr],
    current_dir: Option<&Path>,
) -> Result<Output, ToolchainError> {
    let mut command = tokio::process::Command::new(program);
    command.args(args).kill_on_drop(true);
    if let Some(dir) = current_dir {
        command.current_dir(dir);
    }
    debug!("running {} {:?}", program, args);
    let output = command.output().await.map_err(|source| {
        error!("failed to spawn {}: {}", program, source);
        ToolchainError::Spawn {
            program: program.to_string(),
            source,
        }
    })?;
    if !output.status.success() {
        return Err(ToolchainError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}


#[cfg(test)]
pub(crate) use fake::FakeToolchain;

#[cfg(test)]
mod fake {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use parking_lot::Mutex;

    use super::*;
    use crate::entity::ReleaseChannel;

    /// Canned toolchain answers keyed by manifest path.
    #[derive(Default)]
    pub(crate) struct FakeToolchain {
        pub metadata: Mutex<HashMap<PathBuf, String>>,
        pub sysroot: Option<PathBuf>,
        pub metadata_calls: AtomicUsize,
    }

    impl FakeToolchain {
        pub fn with_metadata(self, manifest: &Path, json: serde_json::Value) -> Self {
            self.metadata
                .lock()
                .insert(manifest.to_path_buf(), json.to_string());
            self
        }

        pub fn metadata_calls(&self) -> usize {
            self.metadata_calls.load(Ordering::SeqCst)
        }
    }

    impl Toolchain for FakeToolchain {
        fn metadata<'a>(
            &'a self,
            manifest: &'a Path,
        ) -> BoxFuture<'a, Result<RawMetadata, ToolchainError>> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            let json = self.metadata.lock().get(manifest).cloned();
            Box::pin(async move {
                let json = json.ok_or_else(|| ToolchainError::Failed {
                    program: "cargo".to_string(),
                    status: "exit status: 101".to_string(),
                    stderr: "could not find `Cargo.toml`".to_string(),
                })?;
                Ok(parse_metadata(&json)?)
            })
        }

        fn rustc_info(&self) -> BoxFuture<'_, Result<RustcInfo, ToolchainError>> {
            Box::pin(async {
                Ok(RustcInfo {
                    version: semver::Version::new(1, 80, 0),
                    channel: ReleaseChannel::Stable,
                    host: "x86_64-unknown-linux-gnu".to_string(),
                    commit_hash: None,
                })
            })
        }

        fn sysroot(&self) -> BoxFuture<'_, Result<PathBuf, ToolchainError>> {
            let sysroot = self.sysroot.clone();
            Box::pin(async move {
                sysroot.ok_or_else(|| ToolchainError::UnexpectedOutput {
                    program: "rustc".to_string(),
                    output: String::new(),
                })
            })
        }
    }
}
