//! Active statements reported by the runtime and their projections.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::solution::DocumentId;
use crate::span::{LinePositionSpan, SourceFileSpan};

/// Identity of a loaded module (MVID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u128);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A method body as seen by the runtime: metadata token plus EnC version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedMethodId {
    pub module: ModuleId,
    pub token: u32,
    pub version: u32,
}

impl ManagedMethodId {
    pub const fn new(module: ModuleId, token: u32, version: u32) -> Self {
        Self {
            module,
            token,
            version,
        }
    }
}

impl fmt::Display for ManagedMethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:0x{:08x}:v{}", self.module, self.token, self.version)
    }
}

/// Instruction identity: equal iff module, token, version and offset all match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedInstructionId {
    pub method: ManagedMethodId,
    pub il_offset: u32,
}

impl ManagedInstructionId {
    pub const fn new(method: ManagedMethodId, il_offset: u32) -> Self {
        Self { method, il_offset }
    }
}

impl fmt::Display for ManagedInstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+0x{:x}", self.method, self.il_offset)
    }
}

/// Position of a statement in the session-global active statement sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActiveStatementId(pub u32);

/// Runtime thread identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ActiveStatementFlags: u32 {
        /// At least one thread has this instruction in its leaf frame.
        const LEAF_FRAME = 1 << 0;
        /// At least one thread has this instruction in a non-leaf frame.
        const NON_LEAF_FRAME = 1 << 1;
        /// The statement was partially executed (e.g. stepped into a call).
        const PARTIALLY_EXECUTED = 1 << 2;
        const NON_USER_CODE = 1 << 3;
        /// The frame executes the latest version of the method.
        const METHOD_UP_TO_DATE = 1 << 4;
    }
}

/// Active statement debug record as reported by the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStatementDebugInfo {
    pub instruction_id: ManagedInstructionId,
    /// Mapped document path; records without one have no source location.
    pub document_name: Option<Arc<str>>,
    pub source_span: LinePositionSpan,
    pub thread_ids: Vec<ThreadId>,
    pub flags: ActiveStatementFlags,
}

impl ActiveStatementDebugInfo {
    pub fn has_source_location(&self) -> bool {
        self.document_name
            .as_deref()
            .is_some_and(|name| !name.is_empty())
    }
}

/// An instruction currently executing on some paused thread.
///
/// Multiple threads share one instance when they stop at the same instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStatement {
    pub id: ActiveStatementId,
    pub flags: ActiveStatementFlags,
    /// Mapped location, corrected by the non-remappable region ledger.
    pub file_span: SourceFileSpan,
    pub instruction_id: ManagedInstructionId,
}

impl ActiveStatement {
    pub fn new(
        id: ActiveStatementId,
        flags: ActiveStatementFlags,
        file_span: SourceFileSpan,
        instruction_id: ManagedInstructionId,
    ) -> Self {
        Self {
            id,
            flags,
            file_span,
            instruction_id,
        }
    }

    pub fn with_span(&self, span: LinePositionSpan) -> Self {
        self.with_file_span(self.file_span.with_span(span))
    }

    pub fn with_file_span(&self, file_span: SourceFileSpan) -> Self {
        Self {
            file_span,
            ..self.clone()
        }
    }

    pub fn with_flags(&self, flags: ActiveStatementFlags) -> Self {
        Self {
            flags,
            ..self.clone()
        }
    }

    #[inline]
    pub fn span(&self) -> LinePositionSpan {
        self.file_span.span
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.file_span.path
    }

    pub fn is_leaf(&self) -> bool {
        self.flags.contains(ActiveStatementFlags::LEAF_FRAME)
    }

    pub fn is_non_leaf(&self) -> bool {
        self.flags.contains(ActiveStatementFlags::NON_LEAF_FRAME)
    }

    pub fn is_method_up_to_date(&self) -> bool {
        self.flags.contains(ActiveStatementFlags::METHOD_UP_TO_DATE)
    }
}

/// Exception handler regions surrounding an active statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActiveStatementExceptionRegions {
    /// Spans of catch/finally regions, innermost first.
    pub spans: Vec<SourceFileSpan>,
    /// `true` if the statement is inside a `try` block covered by the
    /// first region rather than inside a handler.
    pub is_active_statement_covered: bool,
}

impl ActiveStatementExceptionRegions {
    pub fn new(spans: Vec<SourceFileSpan>, is_active_statement_covered: bool) -> Self {
        Self {
            spans,
            is_active_statement_covered,
        }
    }
}

/// An active statement projected into a specific old tree's unmapped space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmappedActiveStatement {
    pub unmapped_span: LinePositionSpan,
    pub statement: Arc<ActiveStatement>,
    pub exception_regions: ActiveStatementExceptionRegions,
}

/// Active statement location reported to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStatementSpan {
    pub id: ActiveStatementId,
    pub line_span: LinePositionSpan,
    pub flags: ActiveStatementFlags,
    /// Document the span is unmapped into, if different from the document
    /// the span was requested for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmapped_document_id: Option<DocumentId>,
}

impl ActiveStatementSpan {
    pub fn new(id: ActiveStatementId, line_span: LinePositionSpan, flags: ActiveStatementFlags) -> Self {
        Self {
            id,
            line_span,
            flags,
            unmapped_document_id: None,
        }
    }
}
