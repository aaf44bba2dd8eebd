//! BuildOutputInterpreter: streamed cargo output to structured build events.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::trace;

use crate::line::{strip_ansi, strip_progress, LineBuffer};
use crate::message::{ArtifactRecord, CargoMessage, CompilerDiagnostic};

// Static regex patterns using OnceLock
static DIAGNOSTIC_RE: OnceLock<Regex> = OnceLock::new();
static SUMMARY_RE: OnceLock<Regex> = OnceLock::new();
static PROGRESS_RE: OnceLock<Regex> = OnceLock::new();

fn diagnostic_re() -> &'static Regex {
    DIAGNOSTIC_RE.get_or_init(|| Regex::new(r"^(error|warning)(?:\[(\w+)\])?: (.*)$").unwrap())
}

fn summary_re() -> &'static Regex {
    SUMMARY_RE.get_or_init(|| {
        Regex::new(
            r"^(?:error|warning): (?:.*generated \d+ warnings?|\d+ warnings? emitted|aborting due to|could not compile|build failed)",
        )
        .unwrap()
    })
}

fn progress_re() -> &'static Regex {
    PROGRESS_RE.get_or_init(|| Regex::new(r"^\s*Building \[[=> ]*\]").unwrap())
}

/// Which pipe of the build process a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

impl DiagnosticLevel {
    fn parse(level: &str) -> Option<Self> {
        match level {
            "error" | "error: internal compiler error" => Some(DiagnosticLevel::Error),
            "warning" => Some(DiagnosticLevel::Warning),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub code: Option<String>,
    pub package_id: Option<String>,
    pub location: Option<Location>,
    /// Human-readable rendering as rustc would print it
    pub rendered: Option<String>,
}

/// Identifies the target an artifact was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetKey {
    pub package_id: String,
    pub target_name: String,
    pub kind: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub target: TargetKey,
    pub filenames: Vec<PathBuf>,
    pub executable: Option<PathBuf>,
    pub fresh: bool,
}

impl From<ArtifactRecord> for Artifact {
    fn from(record: ArtifactRecord) -> Self {
        Self {
            target: TargetKey {
                package_id: record.package_id,
                target_name: record.target.name,
                kind: record.target.kind,
            },
            filenames: record.filenames,
            executable: record.executable,
            fresh: record.fresh,
        }
    }
}

/// A discrete event extracted from the build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BuildEvent {
    /// Plain log text
    Output(String),
    /// An error or warning, counted toward the build totals
    Diagnostic(Diagnostic),
    Artifact(Artifact),
    BuildScriptExecuted { package_id: String },
    Finished { success: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticCounts {
    pub errors: u32,
    pub warnings: u32,
}

impl DiagnosticCounts {
    fn record(&mut self, level: DiagnosticLevel) {
        match level {
            DiagnosticLevel::Error => self.errors += 1,
            DiagnosticLevel::Warning => self.warnings += 1,
        }
    }
}

/// Artifacts produced by a build, keyed by target.
pub type Artifacts = HashMap<TargetKey, Artifact>;

/// Interprets the stdout and stderr of one build process.
///
/// Each stream has its own line buffer; classification itself is per line
/// and keeps no state besides the running counters and artifacts.
#[derive(Debug, Default)]
pub struct BuildOutputInterpreter {
    stdout: LineBuffer,
    stderr: LineBuffer,
    counts: DiagnosticCounts,
    artifacts: Artifacts,
}

impl BuildOutputInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of raw output and return the events of every completed line.
    pub fn feed(&mut self, stream: Stream, chunk: &[u8]) -> Vec<BuildEvent> {
        let lines = match stream {
            Stream::Stdout => self.stdout.push(chunk),
            Stream::Stderr => self.stderr.push(chunk),
        };
        lines
            .iter()
            .flat_map(|line| self.interpret_line(line))
            .collect()
    }

    /// Interpret whatever unterminated text is left once both streams closed.
    pub fn end_of_stream(&mut self) -> Vec<BuildEvent> {
        let tails: Vec<String> = [self.stdout.flush(), self.stderr.flush()]
            .into_iter()
            .flatten()
            .collect();
        tails
            .iter()
            .flat_map(|line| self.interpret_line(line))
            .collect()
    }

    /// Classify a single logical line.
    pub fn interpret_line(&mut self, line: &str) -> Vec<BuildEvent> {
        let line = strip_progress(line);
        if line.trim().is_empty() {
            return Vec::new();
        }

        if let Some(message) = CargoMessage::parse(line) {
            return self.interpret_message(message);
        }

        let text = strip_ansi(line);
        if progress_re().is_match(&text) {
            trace!("dropping progress line: {}", text);
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        if let Some(diagnostic) = parse_plain_diagnostic(&text) {
            self.counts.record(diagnostic.level);
            events.push(BuildEvent::Output(text));
            events.push(BuildEvent::Diagnostic(diagnostic));
        } else {
            events.push(BuildEvent::Output(text));
        }
        events
    }

    fn interpret_message(&mut self, message: CargoMessage) -> Vec<BuildEvent> {
        match message {
            CargoMessage::CompilerMessage {
                package_id,
                message,
            } => match structured_diagnostic(package_id, message) {
                Ok(diagnostic) => {
                    self.counts.record(diagnostic.level);
                    vec![BuildEvent::Diagnostic(diagnostic)]
                }
                Err(Some(text)) => vec![BuildEvent::Output(text)],
                Err(None) => Vec::new(),
            },
            CargoMessage::CompilerArtifact(record) => {
                let artifact = Artifact::from(record);
                self.artifacts
                    .insert(artifact.target.clone(), artifact.clone());
                vec![BuildEvent::Artifact(artifact)]
            }
            CargoMessage::BuildScriptExecuted { package_id } => {
                vec![BuildEvent::BuildScriptExecuted { package_id }]
            }
            CargoMessage::BuildFinished { success } => vec![BuildEvent::Finished { success }],
        }
    }

    pub fn counts(&self) -> DiagnosticCounts {
        self.counts
    }

    /// Artifacts recorded so far, regardless of the build outcome.
    pub fn pending_artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Consume the interpreter and hand out artifacts of a successful build.
    ///
    /// A failed build yields nothing: partially produced artifacts may be stale.
    pub fn finish(self, succeeded: bool) -> Artifacts {
        if succeeded {
            self.artifacts
        } else {
            Artifacts::new()
        }
    }
}

fn is_summary(text: &str) -> bool {
    summary_re().is_match(text)
}

fn parse_plain_diagnostic(text: &str) -> Option<Diagnostic> {
    if is_summary(text) {
        return None;
    }
    let caps = diagnostic_re().captures(text)?;
    let level = DiagnosticLevel::parse(caps.get(1)?.as_str())?;
    Some(Diagnostic {
        level,
        message: caps.get(3).map_or("", |m| m.as_str()).to_string(),
        code: caps.get(2).map(|m| m.as_str().to_string()),
        package_id: None,
        location: None,
        rendered: None,
    })
}

/// Turn a rustc JSON diagnostic into a counted [`Diagnostic`].
///
/// Notes, help and rustc's own summaries are not counted; they come back as
/// `Err(Some(text))` to be logged, or `Err(None)` when there is nothing to show.
fn structured_diagnostic(
    package_id: String,
    message: CompilerDiagnostic,
) -> Result<Diagnostic, Option<String>> {
    let rendered = message.rendered.map(|r| strip_ansi(&r));
    let Some(level) = DiagnosticLevel::parse(&message.level) else {
        return Err(rendered);
    };
    if is_summary(&format!("{}: {}", message.level, message.message)) {
        return Err(rendered);
    }
    let location = message
        .spans
        .iter()
        .find(|s| s.is_primary)
        .map(|s| Location {
            file: PathBuf::from(&s.file_name),
            line: s.line_start,
            column: s.column_start,
        });
    Ok(Diagnostic {
        level,
        message: message.message,
        code: message.code.map(|c| c.code),
        package_id: Some(package_id),
        location,
        rendered,
    })
}
