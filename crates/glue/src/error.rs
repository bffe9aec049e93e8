use std::fmt;

use serde::Serialize;

use crate::settings::SettingError;
use crate::types::Stage;

/// Messages reported against one line of user-authored source.
///
/// `line` is 1-based in the source the user wrote. Line 0 collects messages
/// that do not point into user code (generated prelude, driver errors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDiagnostics {
    pub stage: Stage,
    pub line: u32,
    pub messages: Vec<String>,
}

/// Per-stage compile failure of a program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct CompileError {
    diagnostics: Vec<StageDiagnostics>,
}

impl CompileError {
    pub(crate) fn new(mut diagnostics: Vec<StageDiagnostics>) -> Self {
        diagnostics.sort_by_key(|entry| (entry.stage, entry.line));
        Self { diagnostics }
    }

    /// All diagnostics, vertex stage first, each stage ordered by line.
    pub fn diagnostics(&self) -> &[StageDiagnostics] {
        &self.diagnostics
    }

    /// Diagnostics for one stage; empty when that stage compiled.
    pub fn stage(&self, stage: Stage) -> Vec<&StageDiagnostics> {
        self.diagnostics
            .iter()
            .filter(|entry| entry.stage == stage)
            .collect()
    }

    pub fn into_diagnostics(self) -> Vec<StageDiagnostics> {
        self.diagnostics
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("shader compilation failed")?;
        for entry in &self.diagnostics {
            for message in &entry.messages {
                write!(f, "\n{}:{}: {}", entry.stage, entry.line, message)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Program,
    Texture,
    Context,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Program => f.write_str("program"),
            ResourceKind::Texture => f.write_str("texture"),
            ResourceKind::Context => f.write_str("glue context"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GlueError {
    /// No adapter or device could be obtained. Reported once at start-up.
    #[error("graphics context unavailable: {0}")]
    GraphicsUnavailable(String),
    #[error("failed to create {what}: {message}")]
    ResourceCreation { what: String, message: String },
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("program '{name}' failed to link: {message}")]
    Link { name: String, message: String },
    #[error("{kind} '{name}' has been disposed")]
    Disposed { kind: ResourceKind, name: String },
    #[error("a {kind} named '{name}' is already registered")]
    NameCollision { kind: ResourceKind, name: String },
    #[error("no {kind} named '{name}' is registered")]
    MissingResource { kind: ResourceKind, name: String },
    #[error("invalid canvas size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("set_size must be called before {0}")]
    Unsized(&'static str),
    #[error(transparent)]
    Setting(#[from] SettingError),
}

impl GlueError {
    pub(crate) fn disposed(kind: ResourceKind, name: &str) -> Self {
        GlueError::Disposed {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn missing(kind: ResourceKind, name: &str) -> Self {
        GlueError::MissingResource {
            kind,
            name: name.to_string(),
        }
    }

    /// Compile diagnostics when this error came from a failed registration.
    pub fn compile_error(&self) -> Option<&CompileError> {
        match self {
            GlueError::Compile(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_orders_by_stage_then_line() {
        let err = CompileError::new(vec![
            StageDiagnostics {
                stage: Stage::Fragment,
                line: 7,
                messages: vec!["late".into()],
            },
            StageDiagnostics {
                stage: Stage::Fragment,
                line: 2,
                messages: vec!["early".into()],
            },
            StageDiagnostics {
                stage: Stage::Vertex,
                line: 9,
                messages: vec!["vertex".into()],
            },
        ]);
        let lines: Vec<_> = err
            .diagnostics()
            .iter()
            .map(|entry| (entry.stage, entry.line))
            .collect();
        assert_eq!(
            lines,
            vec![(Stage::Vertex, 9), (Stage::Fragment, 2), (Stage::Fragment, 7)]
        );
        assert!(err.to_string().contains("fragment:2: early"));
    }

    #[test]
    fn diagnostics_serialize_with_lowercase_stage() {
        let entry = StageDiagnostics {
            stage: Stage::Vertex,
            line: 3,
            messages: vec!["oops".into()],
        };
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["stage"], "vertex");
        assert_eq!(json["line"], 3);
    }
}
