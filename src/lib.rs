//! # cargo-workbench
//!
//! A cargo project model and serialized build coordination for development tools.
//!
//! - [`usecase::ProjectModel`] holds the attached projects and answers
//!   lookups by manifest or source file
//! - [`controller::ProjectService`] refreshes them from `cargo metadata`,
//!   [`controller::RefreshDebouncer`] coalesces manifest changes into refreshes
//! - [`controller::BuildCoordinator`] allows one build per host project at a
//!   time and [`controller::BuildRunner`] drives cargo through it
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cargo_workbench::{controller::*, usecase::ProjectModel};
//! use tokio_util::sync::CancellationToken;
//!
//! let service = ProjectService::new(
//!     Arc::new(ProjectModel::new()),
//!     Arc::new(CargoToolchain::new("cargo", "rustc")),
//! );
//! service.attach(Path::new("/path/to/project"))?;
//! let projects = service.refresh_and_wait(Duration::from_secs(120)).await?;
//!
//! let coordinator = Arc::new(BuildCoordinator::new("host", Duration::from_millis(100)));
//! let runner = BuildRunner::new(coordinator, "cargo");
//! let result = runner
//!     .submit(projects[0].clone(), "build", false, &CancellationToken::new())
//!     .await;
//! ```

pub mod config;
pub mod controller;
pub mod entity;
pub mod usecase;
