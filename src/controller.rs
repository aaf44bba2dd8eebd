mod build;
mod debouncer;
mod refresh;
mod runner;
mod toolchain;

pub use build::*;
pub use debouncer::*;
pub use refresh::*;
pub use runner::*;
pub use toolchain::*;
