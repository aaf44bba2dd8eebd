use std::{any::Any, path::Path, sync::Arc};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::entity::{CanonicalPath, Package, Project};

/// Change notifications published by the [`ProjectModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// The set of projects or their contents changed; carries the current manifests
    ProjectsUpdated { projects: Vec<CanonicalPath> },
}

/// Every cargo project attached in this session, keyed by root manifest.
///
/// Readers get cloned snapshots; a [`Project`] is cheap to clone because its
/// workspace graph is shared.
#[derive(Debug)]
pub struct ProjectModel {
    projects: RwLock<Vec<Project>>,
    events: broadcast::Sender<ModelEvent>,
}

impl Default for ProjectModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectModel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            projects: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.events.subscribe()
    }

    /// Attach a project by manifest path. Returns false if it was already attached.
    ///
    /// Attaching does not refresh; the new project starts out `NeedsUpdate`.
    pub fn attach(&self, manifest: CanonicalPath) -> bool {
        {
            let mut projects = self.projects.write();
            if projects.iter().any(|p| p.manifest == manifest) {
                trace!("project {} already attached", manifest);
                return false;
            }
            debug!("attaching project {}", manifest);
            projects.push(Project::new(manifest));
        }
        self.notify();
        true
    }

    /// Detach a project. Detaching an unknown manifest is a no-op.
    pub fn detach(&self, manifest: &Path) -> bool {
        let removed = {
            let mut projects = self.projects.write();
            let before = projects.len();
            projects.retain(|p| p.manifest.as_ref() != manifest);
            projects.len() != before
        };
        if removed {
            debug!("detached project {}", manifest.display());
            self.notify();
        }
        removed
    }

    pub fn projects(&self) -> Vec<Project> {
        self.projects.read().clone()
    }

    pub fn manifests(&self) -> Vec<CanonicalPath> {
        self.projects
            .read()
            .iter()
            .map(|p| p.manifest.clone())
            .collect()
    }

    pub fn project(&self, manifest: &Path) -> Option<Project> {
        self.projects
            .read()
            .iter()
            .find(|p| p.manifest.as_ref() == manifest)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    /// Replace a batch of refreshed projects and notify once.
    ///
    /// Only projects that are still attached are replaced, so a project
    /// detached while its refresh was running stays detached. Returns the
    /// projects that were committed.
    pub fn commit(&self, refreshed: Vec<Project>) -> Vec<Project> {
        let committed: Vec<Project> = {
            let mut projects = self.projects.write();
            refreshed
                .into_iter()
                .filter_map(|new| {
                    let slot = projects.iter_mut().find(|p| p.manifest == new.manifest)?;
                    *slot = new.clone();
                    Some(new)
                })
                .collect()
        };
        debug!("committed {} refreshed projects", committed.len());
        self.notify();
        committed
    }

    /// Attach host data to a project. The slot is cleared by the next refresh.
    pub fn set_user_data(&self, manifest: &Path, data: Arc<dyn Any + Send + Sync>) -> bool {
        let mut projects = self.projects.write();
        let Some(project) = projects.iter_mut().find(|p| p.manifest.as_ref() == manifest) else {
            return false;
        };
        *project = project.clone().with_user_data(data);
        true
    }

    /// The innermost project containing `file`.
    pub fn find_project_for_file(&self, file: &Path) -> Option<Project> {
        let file = CanonicalPath::lossy(file);
        self.projects
            .read()
            .iter()
            .filter(|p| p.contains_file(&file))
            .max_by_key(|p| p.root_dir().components().count())
            .cloned()
    }

    /// The package owning `file`, with the project it belongs to.
    pub fn find_package_for_file(&self, file: &Path) -> Option<(Project, Package)> {
        let file = CanonicalPath::lossy(file);
        let project = self.find_project_for_file(&file)?;
        let package = project.find_package_for_file(&file)?.clone();
        Some((project, package))
    }

    fn notify(&self) {
        let event = ModelEvent::ProjectsUpdated {
            projects: self.manifests(),
        };
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use metadata_parser::{Edition, PackageId, PackageOrigin, SourceKind, WorkspaceGraph};
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::entity::UpdateStatus;

    fn manifest_in(dir: &Path, rel: &str) -> CanonicalPath {
        let path = dir.join(rel);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("Cargo.toml"), "").unwrap();
        CanonicalPath::manifest(&path).unwrap()
    }

    fn graph_with_package(root: &Path, name: &str) -> WorkspaceGraph {
        let package = Package {
            id: PackageId::new(format!("{name} 0.1.0")),
            name: name.to_string(),
            version: "0.1.0".to_string(),
            root: root.to_path_buf(),
            origin: PackageOrigin::Workspace,
            edition: Edition::Edition2021,
            source: SourceKind::Path,
            targets: Vec::new(),
        };
        WorkspaceGraph::new(root.to_path_buf(), vec![package], HashMap::new())
    }

    #[test]
    fn test_attach_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let model = ProjectModel::new();
        let manifest = manifest_in(dir.path(), "app");

        assert!(model.attach(manifest.clone()));
        assert!(!model.attach(manifest.clone()));
        assert_eq!(model.len(), 1);
        assert_eq!(
            model.project(&manifest).unwrap().workspace_status,
            UpdateStatus::NeedsUpdate
        );

        assert!(model.detach(&manifest));
        assert!(!model.detach(&manifest));
        assert!(model.is_empty());
    }

    #[test]
    fn test_commit_notifies_once_and_skips_detached() {
        let dir = tempfile::tempdir().unwrap();
        let model = ProjectModel::new();
        let a = manifest_in(dir.path(), "a");
        let b = manifest_in(dir.path(), "b");
        model.attach(a.clone());
        model.attach(b.clone());
        let mut rx = model.subscribe();

        let mut refreshed_a = Project::new(a.clone());
        refreshed_a.workspace_status = UpdateStatus::UpToDate;
        let mut refreshed_b = Project::new(b.clone());
        refreshed_b.workspace_status = UpdateStatus::UpToDate;

        model.detach(&b);
        assert!(matches!(rx.try_recv(), Ok(ModelEvent::ProjectsUpdated { .. })));

        let committed = model.commit(vec![refreshed_a, refreshed_b]);
        assert_eq!(committed.len(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            ModelEvent::ProjectsUpdated {
                projects: vec![a.clone()]
            }
        );
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(model.project(&b).is_none());
        assert_eq!(
            model.project(&a).unwrap().workspace_status,
            UpdateStatus::UpToDate
        );
    }

    #[test]
    fn test_find_for_file_prefers_innermost_project() {
        let dir = tempfile::tempdir().unwrap();
        let model = ProjectModel::new();
        let outer = manifest_in(dir.path(), "outer");
        let inner = manifest_in(dir.path(), "outer/nested");
        model.attach(outer.clone());
        model.attach(inner.clone());

        let mut project = Project::new(inner.clone());
        project.workspace = Some(Arc::new(graph_with_package(inner.dir(), "nested")));
        model.commit(vec![project]);

        let file = inner.dir().join("src/lib.rs");
        assert_eq!(model.find_project_for_file(&file).unwrap().manifest, inner);
        let (project, package) = model.find_package_for_file(&file).unwrap();
        assert_eq!(project.manifest, inner);
        assert_eq!(package.name, "nested");

        let outer_file = outer.dir().join("build.rs");
        assert_eq!(model.find_project_for_file(&outer_file).unwrap().manifest, outer);
        assert!(model.find_package_for_file(&outer_file).is_none());
        assert!(model.find_project_for_file(Path::new("/elsewhere/x.rs")).is_none());
    }

    #[test]
    fn test_user_data_is_reset_by_commit() {
        let dir = tempfile::tempdir().unwrap();
        let model = ProjectModel::new();
        let manifest = manifest_in(dir.path(), "app");
        model.attach(manifest.clone());

        assert!(model.set_user_data(&manifest, Arc::new("host".to_string())));
        assert_eq!(
            model.project(&manifest).unwrap().user_data::<String>().map(String::as_str),
            Some("host")
        );
        model.commit(vec![Project::new(manifest.clone())]);
        assert!(model.project(&manifest).unwrap().user_data.is_none());
    }
}
