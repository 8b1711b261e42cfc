//! Contracts of the collaborators the session drives: the semantic analyzer,
//! the delta emitter, the debugger/runtime and the baseline provider.
//!
//! Implementations live outside this crate; the session only consumes their
//! results.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::active_statement::{
    ActiveStatement, ActiveStatementDebugInfo, ActiveStatementExceptionRegions, ActiveStatementSpan,
    ManagedMethodId, ModuleId, UnmappedActiveStatement,
};
use crate::baseline::EmitBaseline;
use crate::body::BodyKind;
use crate::capabilities::EditAndContinueCapabilities;
use crate::diagnostics::{EncDiagnostic, RudeEditDiagnostic};
use crate::error::EncResult;
use crate::regions::NonRemappableRegion;
use crate::solution::{ContentHash, DocumentId, DocumentSnapshot, ProjectId, ProjectSnapshot};
use crate::span::{LinePositionSpan, SequencePointUpdates, SourceFileSpan};

/// Inputs of one document analysis. The analyzer must be a pure function of
/// these.
#[derive(Debug, Clone)]
pub struct DocumentAnalysisRequest {
    pub old_project: Arc<ProjectSnapshot>,
    /// `None` when the document is new to the debuggee.
    pub old_document: Option<Arc<DocumentSnapshot>>,
    pub new_document: Arc<DocumentSnapshot>,
    /// Base active statements of the old document, in unmapped coordinates.
    pub old_active_statements: Arc<[UnmappedActiveStatement]>,
    /// Editor-tracked spans of the same statements in the new document.
    pub new_active_statement_spans: Arc<[LinePositionSpan]>,
    pub capabilities: EditAndContinueCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticEditKind {
    Update,
    Insert,
    Delete,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticEdit {
    pub kind: SemanticEditKind,
    /// Stable symbol key understood by the delta emitter.
    pub symbol: Arc<str>,
    pub body: Option<BodyKind>,
}

impl SemanticEdit {
    pub fn new(kind: SemanticEditKind, symbol: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            symbol: symbol.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: BodyKind) -> Self {
        self.body = Some(body);
        self
    }
}

/// Result of analyzing one changed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAnalysisResults {
    pub document_id: DocumentId,
    /// New locations of the old document's active statements, one per entry of
    /// the request's `old_active_statements`. Empty when withheld.
    pub active_statements: Vec<ActiveStatement>,
    pub rude_edits: Vec<RudeEditDiagnostic>,
    pub semantic_edits: Vec<SemanticEdit>,
    /// Exception regions of each new active statement.
    pub exception_regions: Vec<Vec<SourceFileSpan>>,
    pub line_edits: Vec<SequencePointUpdates>,
    pub has_changes: bool,
    pub has_compilation_errors: bool,
}

impl DocumentAnalysisResults {
    pub fn unchanged(document_id: DocumentId, active_statements: Vec<ActiveStatement>) -> Self {
        Self {
            document_id,
            active_statements,
            rude_edits: Vec::new(),
            semantic_edits: Vec::new(),
            exception_regions: Vec::new(),
            line_edits: Vec::new(),
            has_changes: false,
            has_compilation_errors: false,
        }
    }

    /// Results for a document whose new version does not compile. Nothing is
    /// computed for it.
    pub fn compilation_errors(document_id: DocumentId) -> Self {
        Self {
            has_changes: true,
            has_compilation_errors: true,
            ..Self::unchanged(document_id, Vec::new())
        }
    }

    /// `true` when the document blocks emission.
    pub fn is_blocking(&self) -> bool {
        self.has_compilation_errors || !self.rude_edits.is_empty()
    }

    /// Drops everything computed from a document with compilation errors.
    pub(crate) fn withhold_if_not_compiling(mut self) -> Self {
        if self.has_compilation_errors {
            self.active_statements.clear();
            self.semantic_edits.clear();
            self.exception_regions.clear();
            self.line_edits.clear();
        }
        self
    }
}

#[async_trait]
pub trait EditAndContinueAnalyzer: Send + Sync {
    async fn analyze_document(
        &self,
        request: DocumentAnalysisRequest,
        cancel: CancellationToken,
    ) -> EncResult<DocumentAnalysisResults>;

    /// Exception regions around the statement at `unmapped_span` of `document`.
    fn exception_regions(
        &self,
        document: &DocumentSnapshot,
        unmapped_span: LinePositionSpan,
        is_non_leaf: bool,
    ) -> ActiveStatementExceptionRegions;
}

/// Old/new location of an active statement inside an updated project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStatementChange {
    pub old: Arc<ActiveStatement>,
    pub new_span: SourceFileSpan,
    pub old_exception_regions: Vec<SourceFileSpan>,
    pub new_exception_regions: Vec<SourceFileSpan>,
}

/// Everything the delta emitter needs to compile one project's update.
#[derive(Debug, Clone)]
pub struct ProjectChanges {
    pub project_id: ProjectId,
    pub module_id: ModuleId,
    pub new_project: Arc<ProjectSnapshot>,
    pub semantic_edits: Vec<SemanticEdit>,
    pub line_edits: Vec<SequencePointUpdates>,
    pub active_statements: Vec<ActiveStatementChange>,
}

#[derive(Debug, Default)]
pub struct EmitDeltaResult {
    /// `None` when emit failed; `diagnostics` then explains why.
    pub new_baseline: Option<EmitBaseline>,
    pub il_delta: Arc<[u8]>,
    pub metadata_delta: Arc<[u8]>,
    pub pdb_delta: Arc<[u8]>,
    pub updated_methods: Vec<u32>,
    pub updated_types: Vec<u32>,
    pub non_remappable_regions: Vec<(ManagedMethodId, NonRemappableRegion)>,
    pub diagnostics: Vec<EncDiagnostic>,
    /// Reader over the emitted debug-info delta; must outlive the update.
    pub delta_reader: Option<Box<dyn DebugInfoReader>>,
}

impl EmitDeltaResult {
    pub fn has_errors(&self) -> bool {
        self.new_baseline.is_none() || self.diagnostics.iter().any(EncDiagnostic::is_error)
    }
}

#[async_trait]
pub trait DeltaEmitter: Send + Sync {
    async fn emit_delta(
        &self,
        changes: &ProjectChanges,
        baseline: &EmitBaseline,
        cancel: CancellationToken,
    ) -> EncResult<EmitDeltaResult>;
}

/// Where an active statement of a stale method version must be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedActiveStatementUpdate {
    pub method: ManagedMethodId,
    pub il_offset: u32,
    pub new_span: SourceFileSpan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedModuleUpdate {
    pub module: ModuleId,
    pub il_delta: Arc<[u8]>,
    pub metadata_delta: Arc<[u8]>,
    pub pdb_delta: Arc<[u8]>,
    pub sequence_points: Vec<SequencePointUpdates>,
    pub updated_methods: Vec<u32>,
    pub updated_types: Vec<u32>,
    pub active_statements: Vec<ManagedActiveStatementUpdate>,
    pub exception_regions: Vec<SourceFileSpan>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyUpdatesOutcome {
    Applied,
    Rejected(String),
}

#[async_trait]
pub trait DebuggerService: Send + Sync {
    /// Active statements of all paused threads, each live instruction once.
    async fn active_statements(
        &self,
        cancel: CancellationToken,
    ) -> EncResult<Vec<ActiveStatementDebugInfo>>;

    async fn capabilities(&self, cancel: CancellationToken) -> EncResult<Vec<String>>;

    /// Hint that `module` is about to receive its first update.
    async fn prepare_module_for_update(
        &self,
        module: ModuleId,
        cancel: CancellationToken,
    ) -> EncResult<()>;

    async fn apply_updates(
        &self,
        updates: &[ManagedModuleUpdate],
        cancel: CancellationToken,
    ) -> EncResult<ApplyUpdatesOutcome>;
}

/// Open debug-info of a module or a delta.
pub trait DebugInfoReader: Send + Sync + fmt::Debug {
    /// Checksum recorded for `path`, if the document was compiled into the
    /// module.
    fn document_checksum(&self, path: &str) -> Option<ContentHash>;
}

/// Compiled state of a project as first observed in the session.
#[derive(Debug)]
pub struct ModuleBaselineData {
    pub module_id: ModuleId,
    pub metadata: Arc<[u8]>,
    pub debug_info: Box<dyn DebugInfoReader>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BaselineError {
    #[error("output of {0} has not been built")]
    NotBuilt(String),
    #[error("{0} is locked by another process")]
    Locked(String),
    #[error("unable to read {0}")]
    Unreadable(String),
}

pub trait BaselineProvider: Send + Sync {
    fn open_baseline(&self, project: &ProjectSnapshot) -> Result<ModuleBaselineData, BaselineError>;
}

/// Editor-side tracking of active statement spans in open documents.
#[async_trait]
pub trait ActiveStatementSpanProvider: Send + Sync {
    async fn tracked_spans(
        &self,
        document: DocumentId,
        path: &str,
        cancel: CancellationToken,
    ) -> EncResult<Vec<ActiveStatementSpan>>;
}

/// Span provider for hosts that do not track spans.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrackedSpans;

#[async_trait]
impl ActiveStatementSpanProvider for NoTrackedSpans {
    async fn tracked_spans(
        &self,
        _document: DocumentId,
        _path: &str,
        _cancel: CancellationToken,
    ) -> EncResult<Vec<ActiveStatementSpan>> {
        Ok(Vec::new())
    }
}

/// Bundle of collaborators shared by every session of a service.
#[derive(Clone)]
pub struct EncServices {
    pub analyzer: Arc<dyn EditAndContinueAnalyzer>,
    pub emitter: Arc<dyn DeltaEmitter>,
    pub debugger: Arc<dyn DebuggerService>,
    pub baselines: Arc<dyn BaselineProvider>,
}

impl fmt::Debug for EncServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncServices").finish_non_exhaustive()
    }
}
