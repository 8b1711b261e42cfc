//! Diagnostics surfaced to the editor: rude edits and session-level errors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::solution::{DocumentId, ProjectId};
use crate::span::LinePositionSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

/// Error codes reported by the session itself (as opposed to rude edits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditAndContinueErrorCode {
    /// The compiled module or its debug info could not be read.
    ErrorReadingFile,
    /// The delta emitter failed unexpectedly.
    CannotApplyChangesUnexpectedError,
    /// The document differs from the one the module was built from.
    DocumentIsOutOfSyncWithDebuggee,
    /// The project does not support edit-and-continue.
    ProjectNotSupported,
}

impl EditAndContinueErrorCode {
    pub fn code(self) -> &'static str {
        match self {
            Self::ErrorReadingFile => "ENC1001",
            Self::CannotApplyChangesUnexpectedError => "ENC1002",
            Self::DocumentIsOutOfSyncWithDebuggee => "ENC1005",
            Self::ProjectNotSupported => "ENC2001",
        }
    }

    pub fn severity(self) -> DiagnosticSeverity {
        match self {
            Self::DocumentIsOutOfSyncWithDebuggee => DiagnosticSeverity::Warning,
            _ => DiagnosticSeverity::Error,
        }
    }
}

/// Kinds of edits the runtime cannot apply to a running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RudeEditKind {
    Update,
    Insert,
    Delete,
    Move,
    Renamed,
    ChangingSignature,
    ChangingCapturedVariableType,
    DeleteActiveStatement,
    UpdateAroundActiveStatement,
    UpdateExceptionHandlerOfActiveTry,
    PartiallyExecutedActiveStatementUpdate,
    NotSupportedByRuntime,
    InsertNotSupportedByRuntime,
    UpdatingStateMachineMethodNotSupportedByRuntime,
}

impl RudeEditKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Update => "ENC0001",
            Self::Insert => "ENC0023",
            Self::Delete => "ENC0033",
            Self::Move => "ENC0008",
            Self::Renamed => "ENC0018",
            Self::ChangingSignature => "ENC0038",
            Self::ChangingCapturedVariableType => "ENC0059",
            Self::DeleteActiveStatement => "ENC0004",
            Self::UpdateAroundActiveStatement => "ENC0064",
            Self::UpdateExceptionHandlerOfActiveTry => "ENC0063",
            Self::PartiallyExecutedActiveStatementUpdate => "ENC0080",
            Self::NotSupportedByRuntime => "ENC0097",
            Self::InsertNotSupportedByRuntime => "ENC0085",
            Self::UpdatingStateMachineMethodNotSupportedByRuntime => "ENC0086",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Update => "updating '{0}' requires restarting the application",
            Self::Insert => "adding '{0}' requires restarting the application",
            Self::Delete => "deleting '{0}' requires restarting the application",
            Self::Move => "moving '{0}' requires restarting the application",
            Self::Renamed => "renaming '{0}' requires restarting the application",
            Self::ChangingSignature => "changing the signature of '{0}' requires restarting the application",
            Self::ChangingCapturedVariableType => {
                "changing the type of captured variable '{0}' requires restarting the application"
            }
            Self::DeleteActiveStatement => {
                "an active statement has been removed from its original method"
            }
            Self::UpdateAroundActiveStatement => {
                "updating a '{0}' statement around an active statement requires restarting the application"
            }
            Self::UpdateExceptionHandlerOfActiveTry => {
                "modifying a catch/finally handler with an active statement in the try block requires restarting the application"
            }
            Self::PartiallyExecutedActiveStatementUpdate => {
                "updating an active statement that has been partially executed requires restarting the application"
            }
            Self::NotSupportedByRuntime => "applying source changes while the application is running is not supported by the runtime",
            Self::InsertNotSupportedByRuntime => {
                "adding '{0}' requires restarting the application because it is not supported by the runtime"
            }
            Self::UpdatingStateMachineMethodNotSupportedByRuntime => {
                "updating async or iterator '{0}' requires restarting the application because it is not supported by the runtime"
            }
        }
    }
}

/// A rude edit found by the analyzer in a new document version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RudeEditDiagnostic {
    pub kind: RudeEditKind,
    pub span: LinePositionSpan,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

impl RudeEditDiagnostic {
    pub fn new(kind: RudeEditKind, span: LinePositionSpan) -> Self {
        Self {
            kind,
            span,
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn message(&self) -> String {
        let mut message = self.kind.describe().to_string();
        for (idx, argument) in self.arguments.iter().enumerate() {
            message = message.replace(&format!("{{{idx}}}"), argument);
        }
        message
    }

    pub fn to_diagnostic(&self, document: DocumentId) -> EncDiagnostic {
        EncDiagnostic {
            code: self.kind.code().to_string(),
            severity: DiagnosticSeverity::Error,
            message: self.message(),
            project: Some(document.project),
            document: Some(document),
            span: Some(self.span),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncDiagnostic {
    pub code: String,
    pub severity: DiagnosticSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<LinePositionSpan>,
}

impl EncDiagnostic {
    pub fn for_project(
        code: EditAndContinueErrorCode,
        project: ProjectId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.code().to_string(),
            severity: code.severity(),
            message: message.into(),
            project: Some(project),
            document: None,
            span: None,
        }
    }

    pub fn for_document(
        code: EditAndContinueErrorCode,
        document: DocumentId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            document: Some(document),
            ..Self::for_project(code, document.project, message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl fmt::Display for EncDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Info => "info",
        };
        write!(f, "{severity} {}: {}", self.code, self.message)?;
        if let Some(span) = self.span {
            write!(f, " at {span}")?;
        }
        Ok(())
    }
}
