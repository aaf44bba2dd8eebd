use std::{
    any::Any,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;

use super::{CanonicalPath, Dropped, Package, WorkspaceGraph};

/// Freshness of one piece of project data.
///
/// Ordered by priority: merging keeps the more severe status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UpdateStatus {
    UpToDate,
    NeedsUpdate,
    UpdateFailed(String),
}

impl UpdateStatus {
    fn priority(&self) -> u8 {
        match self {
            UpdateStatus::UpToDate => 0,
            UpdateStatus::NeedsUpdate => 1,
            UpdateStatus::UpdateFailed(_) => 2,
        }
    }

    /// Keep the higher priority status; on a tie the left operand wins.
    pub fn merge(self, other: UpdateStatus) -> UpdateStatus {
        if other.priority() > self.priority() {
            other
        } else {
            self
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            UpdateStatus::UpdateFailed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReleaseChannel {
    Stable,
    Beta,
    Nightly,
    Dev,
}

/// Toolchain description parsed from `rustc -vV`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RustcInfo {
    pub version: semver::Version,
    pub channel: ReleaseChannel,
    pub host: String,
    pub commit_hash: Option<String>,
}

impl RustcInfo {
    pub fn parse(verbose_version: &str) -> Option<Self> {
        let mut release = None;
        let mut host = None;
        let mut commit_hash = None;
        for line in verbose_version.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "release" => release = semver::Version::parse(value).ok(),
                "host" => host = Some(value.to_string()),
                "commit-hash" if value != "unknown" => commit_hash = Some(value.to_string()),
                _ => {}
            }
        }
        let version = release?;
        let channel = match version.pre.as_str() {
            "" => ReleaseChannel::Stable,
            pre if pre.starts_with("beta") => ReleaseChannel::Beta,
            pre if pre.starts_with("nightly") => ReleaseChannel::Nightly,
            _ => ReleaseChannel::Dev,
        };
        Some(Self {
            version,
            channel,
            host: host?,
            commit_hash,
        })
    }
}

/// One attached cargo project: a root manifest and everything known about it.
///
/// A refresh never edits a project in place, it produces a new value.
#[derive(Clone)]
pub struct Project {
    pub manifest: CanonicalPath,
    /// Absent until a refresh succeeded at least once
    pub workspace: Option<Arc<WorkspaceGraph>>,
    pub rustc: Option<RustcInfo>,
    pub sysroot: Option<PathBuf>,
    pub workspace_status: UpdateStatus,
    pub stdlib_status: UpdateStatus,
    pub rustc_info_status: UpdateStatus,
    /// Packages, targets and edges the last refresh had to leave out
    pub dropped: Arc<[Dropped]>,
    /// Host data the model carries but never interprets
    pub user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl Project {
    pub fn new(manifest: CanonicalPath) -> Self {
        Self {
            manifest,
            workspace: None,
            rustc: None,
            sysroot: None,
            workspace_status: UpdateStatus::NeedsUpdate,
            stdlib_status: UpdateStatus::NeedsUpdate,
            rustc_info_status: UpdateStatus::NeedsUpdate,
            dropped: Arc::from(Vec::new()),
            user_data: None,
        }
    }

    /// Pointwise merge of the three independent statuses.
    pub fn merged_status(&self) -> UpdateStatus {
        self.workspace_status
            .clone()
            .merge(self.stdlib_status.clone())
            .merge(self.rustc_info_status.clone())
    }

    /// Directory of the root manifest.
    pub fn root_dir(&self) -> &Path {
        self.manifest.dir()
    }

    /// Name to show for the project: the root package, or the directory name.
    pub fn presentable_name(&self) -> String {
        let root_package = self.workspace.as_ref().and_then(|ws| {
            ws.workspace_packages()
                .find(|p| p.root == self.root_dir())
                .map(|p| p.name.clone())
        });
        root_package.unwrap_or_else(|| {
            self.root_dir()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.manifest.to_string())
        })
    }

    pub fn find_package_for_file(&self, file: &Path) -> Option<&Package> {
        self.workspace.as_ref()?.find_package_for_file(file)
    }

    /// Whether `file` lies under this project's root or any of its packages.
    pub fn contains_file(&self, file: &Path) -> bool {
        file.starts_with(self.root_dir()) || self.find_package_for_file(file).is_some()
    }

    pub fn with_user_data(mut self, data: Arc<dyn Any + Send + Sync>) -> Self {
        self.user_data = Some(data);
        self
    }

    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("manifest", &self.manifest)
            .field("packages", &self.workspace.as_ref().map(|ws| ws.len()))
            .field("workspace_status", &self.workspace_status)
            .field("stdlib_status", &self.stdlib_status)
            .field("rustc_info_status", &self.rustc_info_status)
            .field("dropped", &self.dropped.len())
            .finish()
    }
}

/// Serializable view of a project for command line output.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub manifest: CanonicalPath,
    pub status: UpdateStatus,
    pub rustc: Option<RustcInfo>,
    pub packages: Vec<PackageSummary>,
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    pub name: String,
    pub version: String,
    pub workspace_member: bool,
    pub targets: Vec<String>,
    pub dependencies: Vec<String>,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        let packages = project
            .workspace
            .as_ref()
            .map(|ws| {
                ws.packages()
                    .iter()
                    .map(|p| PackageSummary {
                        name: p.name.clone(),
                        version: p.version.clone(),
                        workspace_member: p.is_workspace_member(),
                        targets: p.targets.iter().map(|t| t.name.clone()).collect(),
                        dependencies: ws
                            .dependencies_of(&p.id)
                            .unwrap_or_default()
                            .iter()
                            .map(|d| match &d.rename {
                                Some(rename) => format!("{} as {}", d.package, rename),
                                None => d.package.to_string(),
                            })
                            .collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            name: project.presentable_name(),
            manifest: project.manifest.clone(),
            status: project.merged_status(),
            rustc: project.rustc.clone(),
            packages,
            dropped: project.dropped.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_merge() {
        use UpdateStatus::*;
        let failed = UpdateFailed("boom".to_string());

        assert_eq!(UpToDate.merge(NeedsUpdate), NeedsUpdate);
        assert_eq!(NeedsUpdate.merge(UpToDate), NeedsUpdate);
        assert_eq!(NeedsUpdate.merge(failed.clone()), failed);
        assert_eq!(failed.clone().merge(UpToDate), failed);
        // ties keep the left operand
        assert_eq!(
            UpdateFailed("left".to_string()).merge(UpdateFailed("right".to_string())),
            UpdateFailed("left".to_string())
        );
    }

    #[test]
    fn test_merged_status_is_pointwise() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new(CanonicalPath::lossy(dir.path().join("Cargo.toml")));
        project.workspace_status = UpdateStatus::UpToDate;
        project.stdlib_status = UpdateStatus::UpdateFailed("no rust-src".to_string());
        project.rustc_info_status = UpdateStatus::NeedsUpdate;
        assert_eq!(
            project.merged_status(),
            UpdateStatus::UpdateFailed("no rust-src".to_string())
        );
    }

    #[test]
    fn test_parse_rustc_info() {
        let text = "rustc 1.80.0-nightly (051478957 2024-07-21)\n\
                    binary: rustc\n\
                    commit-hash: 051478957371ee0084a7c0913941d2a8c4757bb9\n\
                    commit-date: 2024-07-21\n\
                    host: x86_64-unknown-linux-gnu\n\
                    release: 1.80.0-nightly\n\
                    LLVM version: 18.1.7\n";
        let info = RustcInfo::parse(text).unwrap();
        assert_eq!(info.version, semver::Version::parse("1.80.0-nightly").unwrap());
        assert_eq!(info.channel, ReleaseChannel::Nightly);
        assert_eq!(info.host, "x86_64-unknown-linux-gnu");
        assert!(RustcInfo::parse("garbage").is_none());
    }

    #[test]
    fn test_summary_serializes_rustc_release() {
        let mut project = Project::new(CanonicalPath::lossy("/ws/app/Cargo.toml"));
        project.rustc = RustcInfo::parse("release: 1.80.1\nhost: x86_64-unknown-linux-gnu\n");
        project.rustc_info_status = UpdateStatus::UpToDate;

        let value = serde_json::to_value(ProjectSummary::from(&project)).unwrap();
        assert_eq!(value["name"], "app");
        assert_eq!(value["rustc"]["version"], "1.80.1");
        assert_eq!(value["rustc"]["channel"], "Stable");
        assert_eq!(value["status"], "NeedsUpdate");
    }

    #[test]
    fn test_user_data_slot() {
        let project = Project::new(CanonicalPath::lossy("/ws/Cargo.toml"))
            .with_user_data(Arc::new(42_u32));
        assert_eq!(project.user_data::<u32>(), Some(&42));
        assert_eq!(project.user_data::<String>(), None);
    }
}
