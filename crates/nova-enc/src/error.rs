use thiserror::Error;

use crate::active_statement::{ActiveStatementId, ManagedInstructionId};
use crate::session::DebuggingSessionId;
use crate::solution::DocumentId;

pub type EncResult<T> = Result<T, EncError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("debugging session has ended")]
    SessionEnded,
    #[error("unknown debugging session {0}")]
    SessionNotFound(DebuggingSessionId),
    #[error("internal consistency violation: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error("analysis failed: {0}")]
    Analysis(String),
    #[error("delta emit failed: {0}")]
    Emit(String),
    #[error("debugger: {0}")]
    Debugger(String),
    #[error("task panicked: {0}")]
    TaskPanicked(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EncError {
    /// Fatal errors indicate a caller or algorithm bug rather than a
    /// recoverable condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EncError::Consistency(_) | EncError::TaskPanicked(_))
    }
}

/// Violations of invariants the session relies on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("instruction {instruction} reported for active statements {first:?} and {second:?}")]
    DuplicateInstructionId {
        instruction: ManagedInstructionId,
        first: ActiveStatementId,
        second: ActiveStatementId,
    },
    #[error("active statements of {path} are not sorted by start position")]
    UnsortedActiveStatements { path: String },
    #[error("analysis of {document} returned {actual} active statements, expected {expected}")]
    MismatchedActiveStatementCount {
        document: DocumentId,
        expected: usize,
        actual: usize,
    },
    #[error("a solution update is already pending; commit or discard it first")]
    PendingUpdateExists,
    #[error("no solution update is pending")]
    NoPendingUpdate,
    #[error("committed snapshot of {0} is missing")]
    MissingSnapshot(DocumentId),
}
