use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use metadata_parser::normalize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::{
    entity::{CanonicalPath, Project, RustcInfo, UpdateStatus, MANIFEST_FILE},
    usecase::ProjectModel,
};

use super::toolchain::{Toolchain, ToolchainError};

const RUST_SRC_MISSING: &str = "rust-src component is not installed";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("refresh did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("no cargo project could be refreshed")]
    NoProjects,
}

/// Drives metadata refreshes for every project in a [`ProjectModel`].
pub struct ProjectService {
    model: Arc<ProjectModel>,
    toolchain: Arc<dyn Toolchain>,
}

impl ProjectService {
    pub fn new(model: Arc<ProjectModel>, toolchain: Arc<dyn Toolchain>) -> Self {
        Self { model, toolchain }
    }

    pub fn model(&self) -> &Arc<ProjectModel> {
        &self.model
    }

    /// Attach the project at `path`, a manifest or the directory holding one.
    pub fn attach(&self, path: &Path) -> Result<bool, std::io::Error> {
        let manifest = CanonicalPath::manifest(path)?;
        Ok(self.model.attach(manifest))
    }

    /// Refresh every attached project and commit them as one batch.
    ///
    /// A failing project records `UpdateFailed` and does not stop the others.
    pub async fn refresh_all(&self) -> Vec<Project> {
        let projects = self.model.projects();
        if projects.is_empty() {
            debug!("refresh requested with no attached projects");
            return Vec::new();
        }
        info!("refreshing {} cargo projects", projects.len());

        let (rustc, sysroot) =
            futures::join!(self.toolchain.rustc_info(), self.toolchain.sysroot());
        let rustc = rustc.map_err(|e| e.to_string());
        let stdlib_status = stdlib_status(&sysroot);
        let sysroot = sysroot.ok();

        let refreshed = join_all(projects.into_iter().map(|project| {
            self.refresh_project(project, &rustc, sysroot.as_deref(), &stdlib_status)
        }))
        .await;

        self.model.commit(refreshed)
    }

    /// Same as [`refresh_all`](Self::refresh_all), bounded by `timeout`.
    ///
    /// Fails with `NoProjects` when no project ended up with a workspace.
    pub async fn refresh_and_wait(&self, timeout: Duration) -> Result<Vec<Project>, RefreshError> {
        let projects = tokio::time::timeout(timeout, self.refresh_all())
            .await
            .map_err(|_| RefreshError::TimedOut(timeout))?;
        if projects.iter().all(|p| p.workspace.is_none()) {
            return Err(RefreshError::NoProjects);
        }
        Ok(projects)
    }

    /// Attach manifests found under `roots` when nothing is attached yet, then refresh.
    pub async fn discover_and_refresh(&self, roots: &[PathBuf], max_depth: usize) -> Vec<Project> {
        if self.model.is_empty() {
            for root in roots {
                for manifest in discover_manifests(root, max_depth) {
                    self.model.attach(manifest);
                }
            }
        }
        self.refresh_all().await
    }

    async fn refresh_project(
        &self,
        old: Project,
        rustc: &Result<RustcInfo, String>,
        sysroot: Option<&Path>,
        stdlib_status: &UpdateStatus,
    ) -> Project {
        let manifest = old.manifest.clone();
        // a refresh yields a fresh value; host data does not carry over
        let mut project = Project::new(manifest.clone());
        project.sysroot = sysroot.map(Path::to_path_buf);
        project.stdlib_status = stdlib_status.clone();
        match rustc {
            Ok(info) => {
                project.rustc = Some(info.clone());
                project.rustc_info_status = UpdateStatus::UpToDate;
            }
            Err(reason) => {
                project.rustc_info_status = UpdateStatus::UpdateFailed(reason.clone());
            }
        }

        match self.load_workspace(&manifest).await {
            Ok(normalized) => {
                for dropped in &normalized.dropped {
                    warn!("{}: {}", manifest, dropped);
                }
                trace!(
                    "{} normalized into {} packages",
                    manifest,
                    normalized.graph.len()
                );
                project.workspace = Some(Arc::new(normalized.graph));
                project.dropped = normalized.dropped.into();
                project.workspace_status = UpdateStatus::UpToDate;
            }
            Err(e) => {
                warn!("failed to refresh {}: {}", manifest, e);
                // keep serving the last good snapshot
                project.workspace = old.workspace;
                project.dropped = old.dropped;
                project.workspace_status = UpdateStatus::UpdateFailed(e.to_string());
            }
        }
        project
    }

    async fn load_workspace(
        &self,
        manifest: &CanonicalPath,
    ) -> Result<metadata_parser::Normalized, ToolchainError> {
        let raw = self.toolchain.metadata(manifest).await?;
        Ok(normalize(raw, manifest.dir())?)
    }
}

fn stdlib_status<E: std::fmt::Display>(sysroot: &Result<PathBuf, E>) -> UpdateStatus {
    match sysroot {
        Ok(sysroot) if stdlib_sources(sysroot).is_dir() => UpdateStatus::UpToDate,
        Ok(_) => UpdateStatus::UpdateFailed(RUST_SRC_MISSING.to_string()),
        Err(e) => UpdateStatus::UpdateFailed(e.to_string()),
    }
}

pub fn stdlib_sources(sysroot: &Path) -> PathBuf {
    sysroot.join("lib/rustlib/src/rust/library")
}

/// Cargo manifests at `root` or in its subdirectories, up to `max_depth` levels down.
///
/// A directory with a manifest is not searched further: anything below it
/// belongs to that project's workspace. Hidden directories and `target` are skipped.
pub fn discover_manifests(root: &Path, max_depth: usize) -> Vec<CanonicalPath> {
    let mut found = Vec::new();
    discover_into(root, max_depth, &mut found);
    found.sort();
    found.dedup();
    found
}

fn discover_into(dir: &Path, depth_left: usize, found: &mut Vec<CanonicalPath>) {
    let manifest = dir.join(MANIFEST_FILE);
    if manifest.is_file() {
        if let Ok(manifest) = CanonicalPath::try_from_path(&manifest) {
            trace!("discovered {}", manifest);
            found.push(manifest);
        }
        return;
    }
    if depth_left == 0 {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let skip = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |name| name.starts_with('.') || name == "target");
        if skip || !path.is_dir() {
            continue;
        }
        discover_into(&path, depth_left - 1, found);
    }
}
