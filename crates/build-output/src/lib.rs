//! # build-output
//!
//! Interpret the streamed output of a cargo build.
//!
//! Output arrives in arbitrary chunks on stdout and stderr. The
//! [`BuildOutputInterpreter`] reassembles lines, throws away progress-bar
//! redraws, recognizes cargo's JSON records and rustc diagnostics, and keeps
//! error/warning totals and produced artifacts.
//!
//! ## Example
//!
//! ```ignore
//! use build_output::{BuildEvent, BuildOutputInterpreter, Stream};
//!
//! let mut interpreter = BuildOutputInterpreter::new();
//! for event in interpreter.feed(Stream::Stderr, b"warning: unused variable\n") {
//!     if let BuildEvent::Diagnostic(d) = event {
//!         println!("{:?}: {}", d.level, d.message);
//!     }
//! }
//! let counts = interpreter.counts();
//! let artifacts = interpreter.finish(true);
//! ```

mod interpreter;
mod line;
mod message;

pub use interpreter::{
    Artifact, Artifacts, BuildEvent, BuildOutputInterpreter, Diagnostic, DiagnosticCounts,
    DiagnosticLevel, Location, Stream, TargetKey,
};
pub use line::{strip_ansi, strip_progress, LineBuffer, ERASE_LINE};
pub use message::{
    ArtifactRecord, ArtifactTarget, CargoMessage, CompilerDiagnostic, DiagnosticCode,
    DiagnosticSpan,
};
