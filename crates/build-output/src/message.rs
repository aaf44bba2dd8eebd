//! Machine-readable records printed by `cargo --message-format=json*`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One JSON line on cargo's stdout, keyed by its `reason` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum CargoMessage {
    CompilerMessage {
        package_id: String,
        message: CompilerDiagnostic,
    },
    CompilerArtifact(ArtifactRecord),
    BuildScriptExecuted {
        package_id: String,
    },
    BuildFinished {
        success: bool,
    },
}

impl CargoMessage {
    /// Parse a line if it is one of the records we understand.
    pub fn parse(line: &str) -> Option<Self> {
        if !line.trim_start().starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompilerDiagnostic {
    pub message: String,
    pub level: String,
    pub code: Option<DiagnosticCode>,
    pub rendered: Option<String>,
    #[serde(default)]
    pub spans: Vec<DiagnosticSpan>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticCode {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticSpan {
    pub file_name: String,
    pub line_start: u32,
    pub column_start: u32,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactTarget {
    pub name: String,
    #[serde(default)]
    pub kind: Vec<String>,
    #[serde(default)]
    pub crate_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactRecord {
    pub package_id: String,
    pub target: ArtifactTarget,
    #[serde(default)]
    pub filenames: Vec<PathBuf>,
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub fresh: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compiler_message() {
        let line = r#"{"reason":"compiler-message","package_id":"foo 0.1.0 (path+file:///foo)","target":{"name":"foo","kind":["bin"]},"message":{"message":"unused variable: `x`","level":"warning","code":{"code":"unused_variables","explanation":null},"rendered":"warning: unused variable: `x`\n","spans":[{"file_name":"src/main.rs","line_start":2,"column_start":9,"is_primary":true}]}}"#;
        let Some(CargoMessage::CompilerMessage {
            package_id,
            message,
        }) = CargoMessage::parse(line)
        else {
            panic!("expected compiler message");
        };
        assert_eq!(package_id, "foo 0.1.0 (path+file:///foo)");
        assert_eq!(message.level, "warning");
        assert_eq!(message.code.unwrap().code, "unused_variables");
        assert_eq!(message.spans[0].line_start, 2);
    }

    #[test]
    fn test_unknown_records_are_not_messages() {
        assert!(CargoMessage::parse(r#"{"reason":"something-new"}"#).is_none());
        assert!(CargoMessage::parse("   Compiling foo v0.1.0").is_none());
        assert!(matches!(
            CargoMessage::parse(r#"{"reason":"build-finished","success":true}"#),
            Some(CargoMessage::BuildFinished { success: true })
        ));
    }
}
