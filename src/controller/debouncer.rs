use std::{path::PathBuf, pin::Pin, sync::Arc, time::Duration};

use tokio::sync::mpsc::{self, error::SendError, Sender};
use tokio::time::{sleep, Sleep};
use tracing::{debug, error, trace};

use crate::{
    config::RefreshConfig,
    entity::{Project, MANIFEST_FILE},
};

use super::refresh::ProjectService;

const LOCK_FILE: &str = "Cargo.lock";

/// Coalesces manifest change signals into `refresh_all` calls.
pub struct RefreshDebouncer {
    service: Arc<ProjectService>,
    tx: Sender<Vec<Project>>,
    timeout: u64,
    sender: Option<Sender<DebouncerEvent>>,
}

#[derive(Debug)]
pub enum DebouncerEvent {
    /// A manifest or lockfile changed on disk
    Changed(PathBuf),
    /// The user asked for a refresh
    Requested,
}

impl RefreshDebouncer {
    /// Refreshed batches are delivered on `tx`.
    pub fn new(service: Arc<ProjectService>, tx: Sender<Vec<Project>>, timeout: u64) -> Self {
        Self {
            service,
            tx,
            timeout,
            sender: None,
        }
    }

    /// Debounce with `refresh.debounceMs` from the configuration.
    pub fn from_config(
        service: Arc<ProjectService>,
        tx: Sender<Vec<Project>>,
        config: &RefreshConfig,
    ) -> Self {
        Self::new(service, tx, config.debounce_ms)
    }

    /// Report a changed file. Files that can't affect cargo metadata are ignored.
    pub async fn file_changed(&self, path: PathBuf) -> Result<(), SendError<DebouncerEvent>> {
        if !self.is_relevant(&path) {
            trace!("ignoring change to {}", path.display());
            return Ok(());
        }
        self.send(DebouncerEvent::Changed(path)).await
    }

    pub async fn request_refresh(&self) -> Result<(), SendError<DebouncerEvent>> {
        self.send(DebouncerEvent::Requested).await
    }

    async fn send(&self, event: DebouncerEvent) -> Result<(), SendError<DebouncerEvent>> {
        match self.sender.as_ref() {
            Some(sender) => sender.send(event).await,
            None => Err(SendError(event)),
        }
    }

    /// A `Cargo.toml` inside an attached project, or an attached project's lockfile.
    fn is_relevant(&self, path: &std::path::Path) -> bool {
        let model = self.service.model();
        match path.file_name().and_then(|n| n.to_str()) {
            Some(MANIFEST_FILE) => model.find_project_for_file(path).is_some(),
            Some(LOCK_FILE) => model
                .manifests()
                .iter()
                .any(|manifest| manifest.ensure_lock() == path),
            _ => false,
        }
    }

    pub fn spawn(&mut self) {
        let (internal_tx, mut internal_rx) = mpsc::channel::<DebouncerEvent>(64);
        self.sender = Some(internal_tx);
        let tx = self.tx.clone();
        let service = self.service.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let mut delay: Option<Pin<Box<Sleep>>> = None;
            let mut backoff_path: Option<PathBuf> = None;
            let mut backoff_factor: u32 = 0;

            loop {
                tokio::select! {
                    some_event = internal_rx.recv() => {
                        let Some(event) = some_event else { break };
                        let timeout = match event {
                            DebouncerEvent::Requested => {
                                backoff_path = None;
                                backoff_factor = 0;
                                timeout
                            }
                            DebouncerEvent::Changed(path) => {
                                if backoff_path.as_ref() == Some(&path) {
                                    backoff_factor += 1;
                                } else {
                                    backoff_path = Some(path);
                                    backoff_factor = 0;
                                }
                                calculate_backoff_timeout(timeout, backoff_factor)
                            }
                        };
                        delay = Some(Box::pin(sleep(Duration::from_millis(timeout))));
                    }

                    () = async {
                        if let Some(ref mut d) = delay {
                            d.await
                        } else {
                            futures::future::pending::<()>().await
                        }
                    }, if delay.is_some() => {
                        delay = None;
                        debug!("debounced refresh firing");
                        let projects = service.refresh_all().await;
                        if let Err(e) = tx.send(projects).await {
                            error!("failed to deliver refreshed projects: {}", e);
                        }
                    }
                }
            }
        });
    }
}

fn calculate_backoff_timeout(base_timeout: u64, count: u32) -> u64 {
    let factor = match count {
        0..=5 => 1,
        6..=10 => 2,
        11..=15 => 3,
        16..=20 => 4,
        _ => 5,
    };
    (base_timeout * factor).min(15_000)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        controller::toolchain::FakeToolchain,
        entity::CanonicalPath,
        usecase::ProjectModel,
    };

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(calculate_backoff_timeout(300, 0), 300);
        assert_eq!(calculate_backoff_timeout(300, 6), 600);
        assert_eq!(calculate_backoff_timeout(300, 30), 1500);
        assert_eq!(calculate_backoff_timeout(10_000, 30), 15_000);
    }

    #[tokio::test]
    async fn test_rapid_changes_refresh_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "").unwrap();
        let manifest = CanonicalPath::manifest(dir.path()).unwrap();

        let toolchain = Arc::new(FakeToolchain::default());
        let model = Arc::new(ProjectModel::new());
        model.attach(manifest.clone());
        let service = Arc::new(ProjectService::new(model, toolchain.clone()));

        let (tx, mut rx) = mpsc::channel(4);
        let config = RefreshConfig {
            debounce_ms: 20,
            ..Default::default()
        };
        let mut debouncer = RefreshDebouncer::from_config(service, tx, &config);
        debouncer.spawn();

        for _ in 0..3 {
            debouncer
                .file_changed(manifest.to_path_buf())
                .await
                .unwrap();
        }
        debouncer
            .file_changed(manifest.dir().join("src/lib.rs"))
            .await
            .unwrap();

        let projects = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(projects.len(), 1);
        assert!(
            tokio::time::timeout(Duration::from_millis(200), rx.recv())
                .await
                .is_err()
        );
        assert_eq!(toolchain.metadata_calls(), 1);
    }

    #[tokio::test]
    async fn test_lockfile_of_attached_project_is_relevant() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "").unwrap();
        let manifest = CanonicalPath::manifest(dir.path()).unwrap();
        let model = Arc::new(ProjectModel::new());
        model.attach(manifest.clone());
        let service = Arc::new(ProjectService::new(
            model,
            Arc::new(FakeToolchain::default()),
        ));
        let (tx, _rx) = mpsc::channel(1);
        let debouncer = RefreshDebouncer::new(service, tx, 20);

        assert!(debouncer.is_relevant(&manifest.ensure_lock()));
        assert!(debouncer.is_relevant(&manifest));
        assert!(!debouncer.is_relevant(&manifest.dir().join("src/main.rs")));
        assert!(!debouncer.is_relevant(std::path::Path::new("/elsewhere/Cargo.lock")));
        // not spawned yet
        assert!(debouncer.request_refresh().await.is_err());
    }
}
