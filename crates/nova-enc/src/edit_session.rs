//! One edit session: the span of a debugging session between two break-state
//! or capability changes.
//!
//! The session's state lives in [`SessionContext`], shared with the owning
//! debugging session. An edit session itself only memoizes what is valid for
//! its lifetime: the active statement index, the runtime capabilities and the
//! per-document analyses.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::active_statement::{
    ActiveStatementSpan, ManagedMethodId, ModuleId, UnmappedActiveStatement,
};
use crate::analysis_cache::{AnalysisInputs, DocumentAnalysesCache};
use crate::baseline::{BaselineStore, ProjectBaseline};
use crate::capabilities::EditAndContinueCapabilities;
use crate::committed::{CommittedSolution, DocumentState};
use crate::diagnostics::{EditAndContinueErrorCode, EncDiagnostic};
use crate::error::{EncError, EncResult};
use crate::fault::FaultReporter;
use crate::regions::{NonRemappableRegion, NonRemappableRegionLedger};
use crate::services::{
    ActiveStatementChange, ActiveStatementSpanProvider, DebugInfoReader, DocumentAnalysisResults,
    EncServices, ManagedActiveStatementUpdate, ManagedModuleUpdate, ProjectChanges,
};
use crate::session::DebuggingSessionId;
use crate::solution::{
    DocumentChange, DocumentId, DocumentSnapshot, ProjectId, ProjectSnapshot, Solution,
};
use crate::span::SequencePointUpdates;
use crate::statement_map::ActiveStatementsMap;
use crate::worker::Worker;

/// State shared by a debugging session and all of its edit sessions.
pub(crate) struct SessionContext {
    pub(crate) id: DebuggingSessionId,
    pub(crate) services: EncServices,
    pub(crate) span_provider: Arc<dyn ActiveStatementSpanProvider>,
    pub(crate) baselines: BaselineStore,
    pub(crate) committed: CommittedSolution,
    pub(crate) ledger: RwLock<Arc<NonRemappableRegionLedger>>,
    pub(crate) worker: Worker,
    pub(crate) faults: FaultReporter,
    pub(crate) validate_statement_order: bool,
    modules_prepared: Mutex<HashSet<ModuleId>>,
}

impl SessionContext {
    pub(crate) fn new(
        id: DebuggingSessionId,
        solution: Solution,
        services: EncServices,
        span_provider: Arc<dyn ActiveStatementSpanProvider>,
        worker: Worker,
        faults: FaultReporter,
        validate_statement_order: bool,
    ) -> Self {
        Self {
            id,
            baselines: BaselineStore::new(Arc::clone(&services.baselines)),
            services,
            span_provider,
            committed: CommittedSolution::new(solution),
            ledger: RwLock::new(Arc::new(NonRemappableRegionLedger::new())),
            worker,
            faults,
            validate_statement_order,
            modules_prepared: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn ledger(&self) -> Arc<NonRemappableRegionLedger> {
        Arc::clone(&self.ledger.read())
    }

    /// Tells the debugger, once per module and session, that `module` is
    /// about to receive an update.
    pub(crate) fn prepare_module(&self, module: ModuleId) {
        if !self.modules_prepared.lock().insert(module) {
            return;
        }
        tracing::debug!(
            target: "nova.enc.session",
            session = %self.id,
            module = %module,
            "preparing module for update"
        );
        let debugger = Arc::clone(&self.services.debugger);
        self.worker.spawn_notification(
            "prepare_module_for_update",
            self.faults.clone(),
            async move {
                debugger
                    .prepare_module_for_update(module, CancellationToken::new())
                    .await
            },
        );
    }

    pub(crate) fn clear_prepared_modules(&self) {
        self.modules_prepared.lock().clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleUpdateStatus {
    /// Nothing to apply.
    None,
    /// Deltas are staged and can be applied.
    Ready,
    /// Some change cannot be applied; nothing is staged.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitSolutionUpdateResults {
    pub status: ModuleUpdateStatus,
    pub module_updates: Vec<ManagedModuleUpdate>,
    pub diagnostics: Vec<EncDiagnostic>,
}

/// An emitted update awaiting commit or discard.
#[derive(Debug)]
pub struct PendingSolutionUpdate {
    pub solution: Solution,
    pub project_baselines: Vec<ProjectBaseline>,
    pub module_updates: Vec<ManagedModuleUpdate>,
    pub non_remappable_regions: Vec<(ManagedMethodId, NonRemappableRegion)>,
    pub line_updates: Vec<SequencePointUpdates>,
    pub delta_readers: Vec<(ProjectId, Box<dyn DebugInfoReader>)>,
    pub applied_documents: Vec<DocumentId>,
}

pub(crate) struct SolutionUpdate {
    pub(crate) results: EmitSolutionUpdateResults,
    pub(crate) pending: Option<PendingSolutionUpdate>,
}

/// Analysis of one changed document against its committed version.
#[derive(Debug, Clone)]
struct DocumentUpdate {
    old_statements: Arc<[UnmappedActiveStatement]>,
    results: Arc<DocumentAnalysisResults>,
}

pub struct EditSession {
    context: Arc<SessionContext>,
    in_break_state: bool,
    ledger: Arc<NonRemappableRegionLedger>,
    base_active_statements: OnceCell<Arc<ActiveStatementsMap>>,
    capabilities: OnceCell<EditAndContinueCapabilities>,
    analyses: DocumentAnalysesCache,
    reported_documents: Mutex<HashSet<DocumentId>>,
}

impl EditSession {
    pub(crate) fn new(context: Arc<SessionContext>, in_break_state: bool) -> Self {
        let analyses = DocumentAnalysesCache::new(
            Arc::clone(&context.services.analyzer),
            context.worker.clone(),
        );
        Self {
            ledger: context.ledger(),
            context,
            in_break_state,
            base_active_statements: OnceCell::new(),
            capabilities: OnceCell::new(),
            analyses,
            reported_documents: Mutex::new(HashSet::new()),
        }
    }

    pub fn in_break_state(&self) -> bool {
        self.in_break_state
    }

    /// The active statement index; empty outside break state. Failures are
    /// not memoized.
    pub async fn base_active_statements(
        &self,
        cancel: &CancellationToken,
    ) -> EncResult<Arc<ActiveStatementsMap>> {
        if !self.in_break_state {
            return Ok(Arc::new(ActiveStatementsMap::empty()));
        }
        self.base_active_statements
            .get_or_try_init(|| async {
                let records = self
                    .context
                    .services
                    .debugger
                    .active_statements(cancel.clone())
                    .await?;
                let map = ActiveStatementsMap::create(&records, Arc::clone(&self.ledger))?;
                if self.context.validate_statement_order {
                    map.validate_ordering()?;
                }
                tracing::debug!(
                    target: "nova.enc.session",
                    session = %self.context.id,
                    reported = records.len(),
                    active_statements = map.len(),
                    "built active statement index"
                );
                Ok::<_, EncError>(Arc::new(map))
            })
            .await
            .cloned()
    }

    pub async fn capabilities(
        &self,
        cancel: &CancellationToken,
    ) -> EncResult<EditAndContinueCapabilities> {
        self.capabilities
            .get_or_try_init(|| async {
                let names = self
                    .context
                    .services
                    .debugger
                    .capabilities(cancel.clone())
                    .await?;
                Ok::<_, EncError>(EditAndContinueCapabilities::parse(
                    names.iter().map(String::as_str),
                ))
            })
            .await
            .copied()
    }

    async fn tracked_spans(
        &self,
        document: &DocumentSnapshot,
        cancel: &CancellationToken,
    ) -> EncResult<Vec<ActiveStatementSpan>> {
        let mut paths: Vec<Arc<str>> = vec![Arc::clone(document.path())];
        if document.has_line_directives() {
            for section in document.mapped_sections() {
                if !paths.contains(&section.mapped.path) {
                    paths.push(section.mapped.path);
                }
            }
        }
        let mut spans = Vec::new();
        for path in paths {
            spans.extend(
                self.context
                    .span_provider
                    .tracked_spans(document.id(), &path, cancel.clone())
                    .await?,
            );
        }
        Ok(spans)
    }

    async fn analyze_document(
        &self,
        old_project: &Arc<ProjectSnapshot>,
        old_document: Option<Arc<DocumentSnapshot>>,
        new_document: Arc<DocumentSnapshot>,
        cancel: &CancellationToken,
    ) -> EncResult<DocumentUpdate> {
        let map = self.base_active_statements(cancel).await?;
        let old_statements: Arc<[UnmappedActiveStatement]> = match &old_document {
            Some(document) => map.old_active_statements(&*self.context.services.analyzer, document),
            None => Arc::from(Vec::new()),
        };
        let tracked_spans = if old_statements.is_empty() {
            Vec::new()
        } else {
            self.tracked_spans(&new_document, cancel).await?
        };
        let capabilities = self.capabilities(cancel).await?;

        let results = self
            .analyses
            .get_document_analysis(
                AnalysisInputs {
                    old_project: Arc::clone(old_project),
                    old_document,
                    new_document,
                    old_active_statements: Arc::clone(&old_statements),
                    tracked_spans,
                    capabilities,
                },
                cancel.clone(),
            )
            .await?;
        Ok(DocumentUpdate {
            old_statements,
            results,
        })
    }

    /// Analyzes every document of `new_project` that differs from the
    /// committed `old_project`. Documents that cannot be analyzed contribute
    /// diagnostics instead.
    async fn analyze_project(
        &self,
        old_project: &Arc<ProjectSnapshot>,
        new_project: &Arc<ProjectSnapshot>,
        diagnostics: &mut Vec<EncDiagnostic>,
        cancel: &CancellationToken,
    ) -> EncResult<Vec<DocumentUpdate>> {
        let mut analyses = Vec::new();
        for change in Solution::document_changes(old_project, new_project) {
            let new_document = match change {
                DocumentChange::Added(document) | DocumentChange::Changed { new: document, .. } => {
                    document
                }
                DocumentChange::Removed(document) => {
                    tracing::debug!(
                        target: "nova.enc.session",
                        document = %document.id(),
                        "ignoring removed document"
                    );
                    continue;
                }
            };
            if new_document.is_design_time_only() {
                continue;
            }

            let (old_document, state) = match self
                .context
                .committed
                .document_and_state(new_document.id(), &self.context.baselines)
            {
                Ok(found) => found,
                Err(err) => {
                    diagnostics.push(EncDiagnostic::for_document(
                        EditAndContinueErrorCode::ErrorReadingFile,
                        new_document.id(),
                        err.to_string(),
                    ));
                    continue;
                }
            };
            match state {
                DocumentState::OutOfSync => {
                    diagnostics.push(out_of_sync(&new_document));
                    continue;
                }
                DocumentState::DesignTimeOnly => continue,
                DocumentState::None | DocumentState::MatchesBuildOutput => {}
            }
            analyses.push(self.analyze_document(old_project, old_document, new_document, cancel));
        }
        try_join_all(analyses).await
    }

    pub(crate) async fn emit_solution_update(
        &self,
        solution: &Solution,
        cancel: &CancellationToken,
    ) -> EncResult<SolutionUpdate> {
        let committed = self.context.committed.solution();
        let mut diagnostics = Vec::new();
        let mut blocked = false;
        let mut staged = StagedUpdate::default();

        for new_project in solution.projects() {
            if cancel.is_cancelled() {
                return Err(EncError::Cancelled);
            }
            let Some(old_project) = committed.project(new_project.id()) else {
                tracing::debug!(
                    target: "nova.enc.session",
                    project = %new_project.id(),
                    "skipping project added during the session"
                );
                continue;
            };
            if Arc::ptr_eq(old_project, new_project) {
                continue;
            }

            let mut project_diagnostics = Vec::new();
            let updates = self
                .analyze_project(old_project, new_project, &mut project_diagnostics, cancel)
                .await?;
            let has_changes = updates.iter().any(|update| update.results.has_changes);
            if has_changes && !new_project.supports_edit_and_continue() {
                project_diagnostics.push(EncDiagnostic::for_project(
                    EditAndContinueErrorCode::ProjectNotSupported,
                    new_project.id(),
                    format!("{} does not support edit and continue", new_project.name()),
                ));
            }
            for update in &updates {
                project_diagnostics.extend(
                    update
                        .results
                        .rude_edits
                        .iter()
                        .map(|rude| rude.to_diagnostic(update.results.document_id)),
                );
            }

            let project_blocked = project_diagnostics.iter().any(EncDiagnostic::is_error)
                || updates.iter().any(|update| update.results.has_compilation_errors);
            diagnostics.append(&mut project_diagnostics);
            if project_blocked {
                blocked = true;
                continue;
            }

            let changed: Vec<&DocumentUpdate> = updates
                .iter()
                .filter(|update| {
                    !update.results.semantic_edits.is_empty() || !update.results.line_edits.is_empty()
                })
                .collect();
            if changed.is_empty() {
                continue;
            }

            let baseline = match self.context.baselines.get_or_open(new_project) {
                Ok(baseline) => baseline,
                Err(err) => {
                    diagnostics.push(EncDiagnostic::for_project(
                        EditAndContinueErrorCode::ErrorReadingFile,
                        new_project.id(),
                        err.to_string(),
                    ));
                    blocked = true;
                    continue;
                }
            };

            let changes = project_changes(new_project, baseline.emit.module_id, &changed);
            let mut emitted = self
                .context
                .services
                .emitter
                .emit_delta(&changes, &baseline.emit, cancel.clone())
                .await?;
            diagnostics.extend(emitted.diagnostics.iter().cloned());
            if emitted.has_errors() {
                blocked = true;
                continue;
            }
            let Some(new_baseline) = emitted.new_baseline.take() else {
                blocked = true;
                continue;
            };

            self.context.prepare_module(baseline.emit.module_id);
            staged.module_updates.push(ManagedModuleUpdate {
                module: baseline.emit.module_id,
                il_delta: Arc::clone(&emitted.il_delta),
                metadata_delta: Arc::clone(&emitted.metadata_delta),
                pdb_delta: Arc::clone(&emitted.pdb_delta),
                sequence_points: changes.line_edits.clone(),
                updated_methods: emitted.updated_methods.clone(),
                updated_types: emitted.updated_types.clone(),
                active_statements: active_statement_updates(&changes.active_statements),
                exception_regions: changes
                    .active_statements
                    .iter()
                    .flat_map(|change| change.new_exception_regions.iter().cloned())
                    .collect(),
            });
            staged.project_baselines.push(ProjectBaseline {
                project_id: new_project.id(),
                emit: new_baseline,
            });
            staged
                .non_remappable_regions
                .append(&mut emitted.non_remappable_regions);
            staged.line_updates.extend(changes.line_edits);
            if let Some(reader) = emitted.delta_reader.take() {
                staged.delta_readers.push((new_project.id(), reader));
            }
            staged.applied_documents.extend(
                changed
                    .iter()
                    .map(|update| update.results.document_id),
            );
        }

        let status = if blocked {
            ModuleUpdateStatus::Blocked
        } else if staged.module_updates.is_empty() {
            ModuleUpdateStatus::None
        } else {
            ModuleUpdateStatus::Ready
        };
        tracing::info!(
            target: "nova.enc.session",
            session = %self.context.id,
            ?status,
            modules = staged.module_updates.len(),
            diagnostics = diagnostics.len(),
            "emitted solution update"
        );

        let module_updates = match status {
            ModuleUpdateStatus::Ready => staged.module_updates.clone(),
            _ => Vec::new(),
        };
        let pending = (status == ModuleUpdateStatus::Ready).then(|| PendingSolutionUpdate {
            solution: solution.clone(),
            project_baselines: staged.project_baselines,
            module_updates: staged.module_updates,
            non_remappable_regions: staged.non_remappable_regions,
            line_updates: staged.line_updates,
            delta_readers: staged.delta_readers,
            applied_documents: staged.applied_documents,
        });
        Ok(SolutionUpdate {
            results: EmitSolutionUpdateResults {
                status,
                module_updates,
                diagnostics,
            },
            pending,
        })
    }

    /// Rude edits and sync warnings for a single document.
    pub async fn get_document_diagnostics(
        &self,
        document: &Arc<DocumentSnapshot>,
        cancel: &CancellationToken,
    ) -> EncResult<Vec<EncDiagnostic>> {
        if document.is_design_time_only() {
            return Ok(Vec::new());
        }
        let committed = self.context.committed.solution();
        let Some(old_project) = committed.project(document.id().project) else {
            return Ok(Vec::new());
        };
        if old_project
            .document(document.id())
            .is_some_and(|old| old.checksum() == document.checksum())
        {
            return Ok(Vec::new());
        }

        // Baseline read errors surface when an update is requested, not here.
        let Ok((old_document, state)) = self
            .context
            .committed
            .document_and_state(document.id(), &self.context.baselines)
        else {
            return Ok(Vec::new());
        };

        let diagnostics = match state {
            DocumentState::DesignTimeOnly => Vec::new(),
            DocumentState::OutOfSync => vec![out_of_sync(document)],
            DocumentState::None | DocumentState::MatchesBuildOutput => {
                let update = self
                    .analyze_document(old_project, old_document, Arc::clone(document), cancel)
                    .await?;
                update
                    .results
                    .rude_edits
                    .iter()
                    .map(|rude| rude.to_diagnostic(document.id()))
                    .collect()
            }
        };
        if !diagnostics.is_empty() {
            self.reported_documents.lock().insert(document.id());
        }
        Ok(diagnostics)
    }

    /// Unmapped spans of the base active statements in the committed version
    /// of each document.
    pub async fn get_base_active_statement_spans(
        &self,
        document_ids: &[DocumentId],
        cancel: &CancellationToken,
    ) -> EncResult<Vec<Vec<ActiveStatementSpan>>> {
        if !self.in_break_state {
            return Ok(vec![Vec::new(); document_ids.len()]);
        }
        let map = self.base_active_statements(cancel).await?;
        let mut spans = Vec::with_capacity(document_ids.len());
        for id in document_ids {
            let old_document = match self
                .context
                .committed
                .document_and_state(*id, &self.context.baselines)
            {
                Ok((Some(document), _)) => document,
                _ => {
                    spans.push(Vec::new());
                    continue;
                }
            };
            let statements = map.old_active_statements(&*self.context.services.analyzer, &old_document);
            spans.push(base_spans(&old_document, &statements));
        }
        Ok(spans)
    }

    /// Active statement spans in the current version of `document`.
    pub async fn get_adjusted_active_statement_spans(
        &self,
        document: &Arc<DocumentSnapshot>,
        cancel: &CancellationToken,
    ) -> EncResult<Vec<ActiveStatementSpan>> {
        if !self.in_break_state {
            return Ok(Vec::new());
        }
        let committed = self.context.committed.solution();
        let Some(old_project) = committed.project(document.id().project) else {
            return Ok(Vec::new());
        };
        let Ok((Some(old_document), _)) = self
            .context
            .committed
            .document_and_state(document.id(), &self.context.baselines)
        else {
            return Ok(Vec::new());
        };

        if old_document.checksum() == document.checksum() {
            let map = self.base_active_statements(cancel).await?;
            let statements =
                map.old_active_statements(&*self.context.services.analyzer, &old_document);
            return Ok(base_spans(&old_document, &statements));
        }

        let update = self
            .analyze_document(old_project, Some(old_document), Arc::clone(document), cancel)
            .await?;
        Ok(update
            .results
            .active_statements
            .iter()
            .map(|statement| ActiveStatementSpan::new(statement.id, statement.span(), statement.flags))
            .collect())
    }

    /// Ends the edit session and reports how many documents had diagnostics
    /// shown. Analyses already running complete for the callers awaiting them.
    pub(crate) fn end(&self) -> usize {
        let reported = std::mem::take(&mut *self.reported_documents.lock());
        if !reported.is_empty() {
            tracing::info!(
                target: "nova.enc.session",
                session = %self.context.id,
                break_state = self.in_break_state,
                reported_documents = reported.len(),
                "edit session ended"
            );
        }
        reported.len()
    }

    /// Abandons every in-flight analysis. Only used once the debugging session
    /// itself is over.
    pub(crate) fn cancel_analyses(&self) {
        self.analyses.cancel_all();
    }
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("session", &self.context.id)
            .field("in_break_state", &self.in_break_state)
            .field("analyses", &self.analyses)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct StagedUpdate {
    project_baselines: Vec<ProjectBaseline>,
    module_updates: Vec<ManagedModuleUpdate>,
    non_remappable_regions: Vec<(ManagedMethodId, NonRemappableRegion)>,
    line_updates: Vec<SequencePointUpdates>,
    delta_readers: Vec<(ProjectId, Box<dyn DebugInfoReader>)>,
    applied_documents: Vec<DocumentId>,
}

fn out_of_sync(document: &DocumentSnapshot) -> EncDiagnostic {
    EncDiagnostic::for_document(
        EditAndContinueErrorCode::DocumentIsOutOfSyncWithDebuggee,
        document.id(),
        format!(
            "the current content of '{}' does not match the version the running application was built from; changes made to it will not be applied",
            document.path()
        ),
    )
}

fn base_spans(
    document: &DocumentSnapshot,
    statements: &[UnmappedActiveStatement],
) -> Vec<ActiveStatementSpan> {
    let unmapped_document_id = document.has_line_directives().then(|| document.id());
    statements
        .iter()
        .map(|statement| ActiveStatementSpan {
            id: statement.statement.id,
            line_span: statement.unmapped_span,
            flags: statement.statement.flags,
            unmapped_document_id,
        })
        .collect()
}

fn project_changes(
    project: &Arc<ProjectSnapshot>,
    module_id: ModuleId,
    updates: &[&DocumentUpdate],
) -> ProjectChanges {
    let mut changes = ProjectChanges {
        project_id: project.id(),
        module_id,
        new_project: Arc::clone(project),
        semantic_edits: Vec::new(),
        line_edits: Vec::new(),
        active_statements: Vec::new(),
    };
    for update in updates {
        let results = &update.results;
        changes
            .semantic_edits
            .extend(results.semantic_edits.iter().cloned());
        changes.line_edits.extend(results.line_edits.iter().cloned());
        for (idx, (old, new)) in update
            .old_statements
            .iter()
            .zip(&results.active_statements)
            .enumerate()
        {
            changes.active_statements.push(ActiveStatementChange {
                old: Arc::clone(&old.statement),
                new_span: new.file_span.clone(),
                old_exception_regions: old.exception_regions.spans.clone(),
                new_exception_regions: results
                    .exception_regions
                    .get(idx)
                    .cloned()
                    .unwrap_or_default(),
            });
        }
    }
    changes
}

fn active_statement_updates(changes: &[ActiveStatementChange]) -> Vec<ManagedActiveStatementUpdate> {
    changes
        .iter()
        .filter(|change| change.old.file_span != change.new_span)
        .map(|change| ManagedActiveStatementUpdate {
            method: change.old.instruction_id.method,
            il_offset: change.old.instruction_id.il_offset,
            new_span: change.new_span.clone(),
        })
        .collect()
}
