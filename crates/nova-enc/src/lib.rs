//! Nova edit-and-continue core.
//!
//! This crate tracks where paused threads are executing (active statements)
//! across successive code updates applied to a running program, and drives the
//! debugging session state machine that stages, commits and discards those
//! updates:
//! - span algebra over line/column spans and `#line`-style mapped sections,
//! - the active statement index built from the debugger's report,
//! - the non-remappable region ledger that relocates threads still running a
//!   stale method version,
//! - a per-document analysis cache that memoizes in-flight analyses,
//! - edit sessions and debugging sessions, owned by [`EditAndContinueService`].
//!
//! Source analysis, delta emission, the debugger and debug-info readers are
//! collaborators behind the traits in [`services`].

pub mod active_statement;
pub mod analysis_cache;
pub mod baseline;
pub mod body;
pub mod capabilities;
pub mod committed;
pub mod config;
pub mod diagnostics;
pub mod edit_session;
pub mod error;
pub mod fault;
pub mod manager;
pub mod regions;
pub mod services;
pub mod session;
pub mod solution;
pub mod span;
pub mod statement_map;
pub mod worker;

pub use active_statement::{
    ActiveStatement, ActiveStatementDebugInfo, ActiveStatementExceptionRegions,
    ActiveStatementFlags, ActiveStatementId, ActiveStatementSpan, ManagedInstructionId,
    ManagedMethodId, ModuleId, ThreadId, UnmappedActiveStatement,
};
pub use baseline::{BaselineStore, EmitBaseline, ProjectBaseline};
pub use body::{Body, BodyKind, DeclarationBody, InitializerBody, StatementBody};
pub use capabilities::EditAndContinueCapabilities;
pub use committed::{CommittedSolution, DocumentState};
pub use config::{init_tracing, ConfigError, EncConfig, LoggingConfig};
pub use diagnostics::{
    DiagnosticSeverity, EditAndContinueErrorCode, EncDiagnostic, RudeEditDiagnostic, RudeEditKind,
};
pub use edit_session::{
    EditSession, EmitSolutionUpdateResults, ModuleUpdateStatus, PendingSolutionUpdate,
};
pub use error::{ConsistencyError, EncError, EncResult};
pub use fault::{FaultReceiver, FaultReport, FaultReporter};
pub use manager::EditAndContinueService;
pub use regions::{NonRemappableRegion, NonRemappableRegionLedger};
pub use services::{
    ActiveStatementSpanProvider, ApplyUpdatesOutcome, BaselineError, BaselineProvider,
    DebugInfoReader, DebuggerService, DeltaEmitter, DocumentAnalysisResults,
    EditAndContinueAnalyzer, EmitDeltaResult, EncServices, ManagedModuleUpdate, ModuleBaselineData,
    ProjectChanges, SemanticEdit, SemanticEditKind,
};
pub use session::{DebuggingSession, DebuggingSessionId, SessionState};
pub use solution::{
    ContentHash, DocumentChange, DocumentId, DocumentSnapshot, LineMappingSection, ProjectId,
    ProjectSnapshot, Solution,
};
pub use span::{LinePosition, LinePositionSpan, SourceFileSpan, SourceLineUpdate};
pub use statement_map::ActiveStatementsMap;
pub use worker::Worker;
