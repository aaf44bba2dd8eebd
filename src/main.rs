use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use cargo_workbench::{
    config::{self, initialize_config, Config, UserConfig},
    controller::{BuildCoordinator, BuildRunner, CargoToolchain, ProjectService},
    entity::{BuildProgress, CanonicalPath, ProjectSummary, MANIFEST_FILE},
    usecase::ProjectModel,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the cargo projects at PATH and print the workspace model as JSON
    Metadata {
        /// A Cargo.toml, a directory containing one, or a directory to search
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Build the project at PATH and print the build result as JSON
    Build {
        path: PathBuf,
        /// Cargo subcommand, optionally with arguments ("build --release")
        #[arg(short, long)]
        task: Option<String>,
        /// Compile the tests without running them
        #[arg(long)]
        tests: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    //logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let user_config = match &args.config {
        Some(path) => UserConfig::from_file(path)?,
        None => UserConfig::default(),
    };
    initialize_config(user_config);
    let config = config::current();
    debug!("using cargo at {}", config.cargo_path);

    let toolchain = Arc::new(CargoToolchain::new(&config.cargo_path, &config.rustc_path));
    let service = ProjectService::new(Arc::new(ProjectModel::new()), toolchain);

    match args.command {
        Command::Metadata { path } => metadata(&service, &config, path).await,
        Command::Build { path, task, tests } => {
            let task = task.unwrap_or_else(|| config.build.default_task.clone());
            let succeeded = build(&service, &config, path, &task, tests).await?;
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn metadata(service: &ProjectService, config: &Config, path: PathBuf) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(config.refresh.timeout_secs);
    let projects = if path.join(MANIFEST_FILE).is_file() || path.is_file() {
        service
            .attach(&path)
            .with_context(|| format!("no cargo manifest at {}", path.display()))?;
        service.refresh_and_wait(timeout).await?
    } else {
        let path = CanonicalPath::try_from_path(&path)
            .with_context(|| format!("failed to resolve {}", path.display()))?;
        let roots = [path.into_path_buf()];
        let refresh = service.discover_and_refresh(&roots, config.discovery.max_depth);
        let projects = tokio::time::timeout(timeout, refresh)
            .await
            .context("timed out refreshing cargo projects")?;
        if projects.is_empty() {
            bail!("no cargo projects found");
        }
        projects
    };

    for project in &projects {
        if let Some(reason) = project.merged_status().failure_reason() {
            warn!("{}: {}", project.manifest, reason);
        }
    }
    let summaries: Vec<ProjectSummary> = projects.iter().map(ProjectSummary::from).collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

async fn build(
    service: &ProjectService,
    config: &Config,
    path: PathBuf,
    task: &str,
    tests: bool,
) -> anyhow::Result<bool> {
    service
        .attach(&path)
        .with_context(|| format!("no cargo manifest at {}", path.display()))?;
    let projects = service
        .refresh_and_wait(Duration::from_secs(config.refresh.timeout_secs))
        .await?;
    let Some(project) = projects.into_iter().next() else {
        bail!("no cargo project at {}", path.display());
    };

    let coordinator = Arc::new(BuildCoordinator::new(
        project.root_dir().display().to_string(),
        config.build.poll_interval(),
    ));
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                BuildProgress::Progress { message, .. } => eprintln!("{message}"),
                BuildProgress::Started { message, .. } => info!("{}", message),
                BuildProgress::Notification {
                    message, duration, ..
                } => info!("{} ({:.2?})", message, duration),
                BuildProgress::Finished { .. } => {}
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, canceling build");
            ctrl_c.cancel();
        }
    });

    let runner = BuildRunner::new(coordinator, &config.cargo_path);
    let result = runner.submit(project, task, tests, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.succeeded)
}
