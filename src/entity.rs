mod build;
mod path;
mod project;

pub use build::*;
pub use path::*;
pub use project::*;

pub use metadata_parser::{Dropped, Package, WorkspaceGraph};
