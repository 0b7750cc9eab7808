//! Compile errors and compiler diagnostics.
//!
//! Compiler stderr is turned into [`Diagnostic`]s so the reload report can
//! show the actual errors instead of a bare exit code. rustc is run with
//! `--error-format=json`; C++ drivers print `file:line:col: level: msg`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::CompilerFlavor;

/// Why a compile did not produce a module.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The compiler process could not be started.
    #[error("failed to run compiler {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The compiler ran and exited with a nonzero status.
    #[error(
        "compile failure ({}){}",
        exit_code.map(|c| format!("exit code {}", c)).unwrap_or_else(|| "terminated by signal".to_string()),
        diagnostics.iter().find(|d| d.level == DiagnosticLevel::Error).map(|d| format!(": {}", d.message)).unwrap_or_default()
    )]
    Failed {
        /// Process exit code, `None` if it was killed by a signal.
        exit_code: Option<i32>,
        /// Parsed diagnostics, errors and warnings alike.
        diagnostics: Vec<Diagnostic>,
        /// Raw stderr, for anything the parser did not recognize.
        stderr: String,
    },
}

impl CompileError {
    /// Exit code for a `Failed` error.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => *exit_code,
            Self::Spawn { .. } => None,
        }
    }

    /// Error-level diagnostics.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        let diagnostics: &[Diagnostic] = match self {
            Self::Failed { diagnostics, .. } => diagnostics,
            Self::Spawn { .. } => &[],
        };
        diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
    }
}

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Note,
    Help,
}

impl DiagnosticLevel {
    fn parse(level: &str) -> Option<Self> {
        match level {
            "error" | "fatal error" | "error: internal compiler error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "note" => Some(Self::Note),
            "help" => Some(Self::Help),
            _ => None,
        }
    }
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Note => "note",
            Self::Help => "help",
        })
    }
}

/// A location in source code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    /// Source file path
    pub file: PathBuf,

    /// Line number (1-indexed)
    pub line: usize,

    /// Column number (1-indexed)
    pub column: usize,
}

/// One compiler message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,

    /// Error code (e.g., "E0308")
    pub code: Option<String>,

    /// Primary source location
    pub location: Option<SourceLocation>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{}:{}:{}: ", loc.file.display(), loc.line, loc.column)?;
        }
        write!(f, "{}", self.level)?;
        if let Some(code) = &self.code {
            write!(f, "[{}]", code)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Rustc JSON diagnostic format.
#[derive(Debug, Deserialize)]
struct RustcDiagnostic {
    #[serde(rename = "$message_type", default)]
    message_type: Option<String>,
    message: String,
    code: Option<RustcCode>,
    level: String,
    #[serde(default)]
    spans: Vec<RustcSpan>,
}

#[derive(Debug, Deserialize)]
struct RustcCode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct RustcSpan {
    file_name: String,
    line_start: usize,
    column_start: usize,
    is_primary: bool,
}

/// Parse compiler stderr according to the toolchain family.
pub fn parse_diagnostics(flavor: CompilerFlavor, stderr: &str) -> Vec<Diagnostic> {
    match flavor {
        CompilerFlavor::Rustc => parse_rustc_json(stderr),
        CompilerFlavor::Cxx => parse_gcc_style(stderr),
    }
}

/// Parse `--error-format=json` output, one JSON object per line.
pub fn parse_rustc_json(stderr: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for line in stderr.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }

        let diagnostic = match serde_json::from_str::<RustcDiagnostic>(line) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(
                    "Failed to parse rustc JSON: {} (line: {})",
                    e,
                    line.chars().take(100).collect::<String>()
                );
                continue;
            }
        };

        if diagnostic
            .message_type
            .as_deref()
            .is_some_and(|t| t != "diagnostic")
        {
            continue;
        }

        // The trailer repeats what the individual errors already said.
        if diagnostic.message.starts_with("aborting due to") {
            continue;
        }

        let Some(level) = DiagnosticLevel::parse(&diagnostic.level) else {
            continue;
        };

        let location = diagnostic
            .spans
            .iter()
            .find(|s| s.is_primary)
            .map(|span| SourceLocation {
                file: PathBuf::from(&span.file_name),
                line: span.line_start,
                column: span.column_start,
            });

        diagnostics.push(Diagnostic {
            level,
            message: diagnostic.message,
            code: diagnostic.code.map(|c| c.code),
            location,
        });
    }

    diagnostics
}

/// Parse GCC/Clang style `file:line:col: level: message` lines.
pub fn parse_gcc_style(stderr: &str) -> Vec<Diagnostic> {
    const LEVELS: [&str; 4] = ["fatal error", "error", "warning", "note"];

    let mut diagnostics = Vec::new();

    for line in stderr.lines() {
        let Some((prefix, level, message)) = LEVELS.iter().find_map(|level| {
            let marker = format!(": {}: ", level);
            line.find(&marker).map(|pos| {
                (
                    &line[..pos],
                    *level,
                    line[pos + marker.len()..].trim().to_string(),
                )
            })
        }) else {
            continue;
        };

        let Some(level) = DiagnosticLevel::parse(level) else {
            continue;
        };

        diagnostics.push(Diagnostic {
            level,
            message,
            code: None,
            location: parse_gcc_location(prefix),
        });
    }

    diagnostics
}

/// Split `path/to/file.cpp:12:5` into its parts.
fn parse_gcc_location(prefix: &str) -> Option<SourceLocation> {
    let mut parts = prefix.rsplitn(3, ':');
    let column = parts.next()?.trim().parse().ok()?;
    let line = parts.next()?.trim().parse().ok()?;
    let file = parts.next()?;
    Some(SourceLocation {
        file: PathBuf::from(file),
        line,
        column,
    })
}
