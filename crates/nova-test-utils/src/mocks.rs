//! Scripted collaborators for driving debugging sessions in tests.
//!
//! Every double records what it was asked to do; tests script answers up
//! front and inspect the recorded calls afterwards.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use nova_enc::services::{ActiveStatementChange, DocumentAnalysisRequest};
use nova_enc::span::SequencePointUpdates;
use nova_enc::{
    ActiveStatement, ActiveStatementDebugInfo, ActiveStatementExceptionRegions,
    ActiveStatementSpan, ActiveStatementSpanProvider, ApplyUpdatesOutcome, BaselineError,
    BaselineProvider, Body, BodyKind, ContentHash, DebugInfoReader, DebuggerService, DeltaEmitter,
    DocumentAnalysisResults, DocumentId, DocumentSnapshot, EditAndContinueAnalyzer, EmitBaseline,
    EmitDeltaResult, EncDiagnostic, EncError, EncResult, EncServices, LinePositionSpan,
    ManagedMethodId, ManagedModuleUpdate, ModuleBaselineData, ModuleId, NonRemappableRegion,
    ProjectChanges, ProjectId, ProjectSnapshot, RudeEditDiagnostic, SemanticEdit,
    SemanticEditKind, SourceFileSpan, SourceLineUpdate,
};

/// What the analyzer reports for one document.
#[derive(Debug, Clone, Default)]
pub struct AnalysisScript {
    pub rude_edits: Vec<RudeEditDiagnostic>,
    pub semantic_edits: Vec<SemanticEdit>,
    /// Line moves in the document. Active statements follow them.
    pub line_updates: Vec<SourceLineUpdate>,
    pub has_compilation_errors: bool,
    /// Old and new version of the edited body. Active statements inside the
    /// old body move to the matching statement of the new one.
    pub bodies: Option<(Body, Body)>,
}

impl AnalysisScript {
    /// An update of the member body of `symbol`.
    pub fn body_update(symbol: &str) -> Self {
        Self {
            semantic_edits: vec![
                SemanticEdit::new(SemanticEditKind::Update, symbol).with_body(BodyKind::Member)
            ],
            ..Self::default()
        }
    }

    pub fn with_line_update(mut self, old_line: i32, new_line: i32) -> Self {
        self.line_updates.push(SourceLineUpdate::new(old_line, new_line));
        self
    }

    pub fn with_rude_edit(mut self, rude: RudeEditDiagnostic) -> Self {
        self.rude_edits.push(rude);
        self
    }

    pub fn with_bodies(mut self, old: Body, new: Body) -> Self {
        self.bodies = Some((old, new));
        self
    }

    pub fn with_compilation_errors(mut self) -> Self {
        self.has_compilation_errors = true;
        self
    }
}

/// Analyzer answering from per-document scripts. Documents without a script
/// report their text change and nothing else.
#[derive(Debug, Default)]
pub struct MockAnalyzer {
    scripts: Mutex<HashMap<DocumentId, AnalysisScript>>,
    exception_regions: Mutex<HashMap<Arc<str>, ActiveStatementExceptionRegions>>,
    analyses: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockAnalyzer {
    pub fn script(&self, document: DocumentId, script: AnalysisScript) {
        self.scripts.lock().insert(document, script);
    }

    pub fn clear_script(&self, document: DocumentId) {
        self.scripts.lock().remove(&document);
    }

    pub fn set_exception_regions(&self, path: &str, regions: ActiveStatementExceptionRegions) {
        self.exception_regions.lock().insert(Arc::from(path), regions);
    }

    /// Every analysis sleeps for `delay` unless cancelled first.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of analyses actually computed.
    pub fn analysis_count(&self) -> usize {
        self.analyses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EditAndContinueAnalyzer for MockAnalyzer {
    async fn analyze_document(
        &self,
        request: DocumentAnalysisRequest,
        cancel: CancellationToken,
    ) -> EncResult<DocumentAnalysisResults> {
        if cancel.is_cancelled() {
            return Err(EncError::Cancelled);
        }
        self.analyses.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(EncError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let document = &request.new_document;
        let script = self
            .scripts
            .lock()
            .get(&document.id())
            .cloned()
            .unwrap_or_default();
        let has_changes = request
            .old_document
            .as_ref()
            .map_or(true, |old| old.checksum() != document.checksum());

        let line_edits = if script.line_updates.is_empty() {
            Vec::new()
        } else {
            vec![SequencePointUpdates::new(
                Arc::clone(document.path()),
                script.line_updates.clone(),
            )]
        };

        let mut active_statements = Vec::with_capacity(request.old_active_statements.len());
        let mut exception_regions = Vec::with_capacity(request.old_active_statements.len());
        for (old, tracked) in request
            .old_active_statements
            .iter()
            .zip(request.new_active_statement_spans.iter())
        {
            // A tracked span that differs from the old one already reflects the edit.
            let new_span = if *tracked == LinePositionSpan::default() || *tracked == old.unmapped_span
            {
                script
                    .bodies
                    .as_ref()
                    .and_then(|(old_body, new_body)| {
                        old_body.match_active_statement(new_body, &old.unmapped_span)
                    })
                    .or_else(|| {
                        line_edits
                            .first()
                            .map(|updates| updates.map_span(&old.unmapped_span))
                    })
                    .unwrap_or(old.unmapped_span)
            } else {
                *tracked
            };
            active_statements.push(moved(&old.statement, document, new_span));
            exception_regions.push(
                old.exception_regions
                    .spans
                    .iter()
                    .map(|span| {
                        line_edits
                            .first()
                            .map_or(span.clone(), |updates| span.with_span(updates.map_span(&span.span)))
                    })
                    .collect(),
            );
        }

        Ok(DocumentAnalysisResults {
            document_id: document.id(),
            active_statements,
            rude_edits: script.rude_edits,
            semantic_edits: script.semantic_edits,
            exception_regions,
            line_edits,
            has_changes,
            has_compilation_errors: script.has_compilation_errors,
        })
    }

    fn exception_regions(
        &self,
        document: &DocumentSnapshot,
        _unmapped_span: LinePositionSpan,
        _is_non_leaf: bool,
    ) -> ActiveStatementExceptionRegions {
        self.exception_regions
            .lock()
            .get(document.path())
            .cloned()
            .unwrap_or_default()
    }
}

fn moved(
    statement: &ActiveStatement,
    document: &DocumentSnapshot,
    span: LinePositionSpan,
) -> ActiveStatement {
    if statement.path() == &**document.path() {
        statement.with_span(span)
    } else {
        statement.with_file_span(SourceFileSpan::new(Arc::clone(document.path()), span))
    }
}

/// Emitter producing a new generation for every request unless told to fail.
///
/// When a method body changed, every active statement whose span moved yields
/// a non-remappable region for its method version.
#[derive(Debug, Default)]
pub struct MockEmitter {
    diagnostics: Mutex<Vec<EncDiagnostic>>,
    fail: Mutex<Option<String>>,
    calls: Mutex<Vec<(ProjectId, u32)>>,
}

impl MockEmitter {
    /// Diagnostics attached to every following emit; error diagnostics block.
    pub fn set_diagnostics(&self, diagnostics: Vec<EncDiagnostic>) {
        *self.diagnostics.lock() = diagnostics;
    }

    /// Makes the next emits fail with `EncError::Emit(message)`.
    pub fn fail_with(&self, message: &str) {
        *self.fail.lock() = Some(message.to_string());
    }

    /// `(project, baseline generation)` of every emit.
    pub fn calls(&self) -> Vec<(ProjectId, u32)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DeltaEmitter for MockEmitter {
    async fn emit_delta(
        &self,
        changes: &ProjectChanges,
        baseline: &EmitBaseline,
        cancel: CancellationToken,
    ) -> EncResult<EmitDeltaResult> {
        if cancel.is_cancelled() {
            return Err(EncError::Cancelled);
        }
        self.calls
            .lock()
            .push((changes.project_id, baseline.generation));
        if let Some(message) = self.fail.lock().clone() {
            return Err(EncError::Emit(message));
        }

        let diagnostics = self.diagnostics.lock().clone();
        if diagnostics.iter().any(EncDiagnostic::is_error) {
            return Ok(EmitDeltaResult {
                diagnostics,
                ..EmitDeltaResult::default()
            });
        }

        let generation = baseline.generation + 1;
        let symbols: Vec<&str> = changes
            .semantic_edits
            .iter()
            .map(|edit| &*edit.symbol)
            .collect();
        let bodies_changed = changes
            .semantic_edits
            .iter()
            .any(|edit| edit.body.is_some_and(BodyKind::replaces_method_body));
        let updated_methods: BTreeSet<u32> = changes
            .active_statements
            .iter()
            .map(|change| change.old.instruction_id.method.token)
            .collect();

        Ok(EmitDeltaResult {
            new_baseline: Some(
                baseline.next_generation(Arc::from(format!("metadata#{generation}").into_bytes())),
            ),
            il_delta: Arc::from(symbols.join(";").into_bytes()),
            metadata_delta: Arc::from(format!("metadata#{generation}").into_bytes()),
            pdb_delta: Arc::from(format!("pdb#{generation}").into_bytes()),
            updated_methods: updated_methods.into_iter().collect(),
            updated_types: Vec::new(),
            non_remappable_regions: changes
                .active_statements
                .iter()
                .filter(|change| bodies_changed && change.old.file_span != change.new_span)
                .flat_map(regions_for)
                .collect(),
            diagnostics,
            delta_reader: Some(Box::new(MockDebugInfo::default())),
        })
    }
}

fn regions_for(
    change: &ActiveStatementChange,
) -> Vec<(ManagedMethodId, NonRemappableRegion)> {
    let method = change.old.instruction_id.method;
    let mut regions = vec![(
        method,
        NonRemappableRegion::new(change.old.file_span.clone(), change.new_span.clone(), false),
    )];
    for (old, new) in change
        .old_exception_regions
        .iter()
        .zip(&change.new_exception_regions)
    {
        regions.push((method, NonRemappableRegion::new(old.clone(), new.clone(), true)));
    }
    regions
}

/// Debugger reporting scripted active statements and recording updates.
#[derive(Debug)]
pub struct MockDebugger {
    active_statements: Mutex<Vec<ActiveStatementDebugInfo>>,
    capabilities: Mutex<Vec<String>>,
    outcome: Mutex<ApplyUpdatesOutcome>,
    fail_prepare: AtomicBool,
    prepared: Mutex<Vec<ModuleId>>,
    applied: Mutex<Vec<Vec<ManagedModuleUpdate>>>,
    active_statement_queries: AtomicUsize,
    apply_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl Default for MockDebugger {
    fn default() -> Self {
        Self {
            active_statements: Mutex::new(Vec::new()),
            capabilities: Mutex::new(
                ["Baseline", "AddMethodToExistingType", "NewTypeDefinition"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            outcome: Mutex::new(ApplyUpdatesOutcome::Applied),
            fail_prepare: AtomicBool::new(false),
            prepared: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            active_statement_queries: AtomicUsize::new(0),
            apply_gate: Mutex::new(None),
        }
    }
}

impl MockDebugger {
    pub fn set_active_statements(&self, records: Vec<ActiveStatementDebugInfo>) {
        *self.active_statements.lock() = records;
    }

    pub fn set_capabilities(&self, names: &[&str]) {
        *self.capabilities.lock() = names.iter().map(|name| name.to_string()).collect();
    }

    pub fn set_apply_outcome(&self, outcome: ApplyUpdatesOutcome) {
        *self.outcome.lock() = outcome;
    }

    pub fn fail_prepare(&self) {
        self.fail_prepare.store(true, Ordering::SeqCst);
    }

    pub fn prepared_modules(&self) -> Vec<ModuleId> {
        self.prepared.lock().clone()
    }

    pub fn applied_updates(&self) -> Vec<Vec<ManagedModuleUpdate>> {
        self.applied.lock().clone()
    }

    pub fn active_statement_queries(&self) -> usize {
        self.active_statement_queries.load(Ordering::SeqCst)
    }

    /// Updates are recorded but not answered until [`Self::release_applies`].
    pub fn hold_applies(&self) {
        *self.apply_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_applies(&self) {
        if let Some(gate) = self.apply_gate.lock().take() {
            gate.close();
        }
    }
}

#[async_trait]
impl DebuggerService for MockDebugger {
    async fn active_statements(
        &self,
        _cancel: CancellationToken,
    ) -> EncResult<Vec<ActiveStatementDebugInfo>> {
        self.active_statement_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.active_statements.lock().clone())
    }

    async fn capabilities(&self, _cancel: CancellationToken) -> EncResult<Vec<String>> {
        Ok(self.capabilities.lock().clone())
    }

    async fn prepare_module_for_update(
        &self,
        module: ModuleId,
        _cancel: CancellationToken,
    ) -> EncResult<()> {
        self.prepared.lock().push(module);
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(EncError::Debugger(format!("module {module} cannot be prepared")));
        }
        Ok(())
    }

    async fn apply_updates(
        &self,
        updates: &[ManagedModuleUpdate],
        _cancel: CancellationToken,
    ) -> EncResult<ApplyUpdatesOutcome> {
        self.applied.lock().push(updates.to_vec());
        let gate = self.apply_gate.lock().clone();
        if let Some(gate) = gate {
            // Closing the gate is the release signal.
            let _ = gate.acquire().await;
        }
        Ok(self.outcome.lock().clone())
    }
}

/// Debug info listing the checksums of the documents a module was built from.
#[derive(Debug, Clone, Default)]
pub struct MockDebugInfo {
    checksums: HashMap<String, ContentHash>,
}

impl DebugInfoReader for MockDebugInfo {
    fn document_checksum(&self, path: &str) -> Option<ContentHash> {
        self.checksums.get(path).copied()
    }
}

#[derive(Debug, Clone)]
struct BuiltModule {
    module_id: ModuleId,
    debug_info: MockDebugInfo,
}

/// Baseline provider over modules "built" by the test.
#[derive(Debug, Default)]
pub struct MockBaselineProvider {
    modules: Mutex<HashMap<ProjectId, BuiltModule>>,
    failures: Mutex<HashMap<ProjectId, BaselineError>>,
    opens: AtomicUsize,
}

impl MockBaselineProvider {
    /// Records `project` as built into `module` from its current documents.
    /// Design-time-only documents are left out.
    pub fn build(&self, project: &ProjectSnapshot, module: ModuleId) {
        let checksums = project
            .documents()
            .filter(|document| !document.is_design_time_only())
            .map(|document| (document.path().to_string(), document.checksum()))
            .collect();
        self.modules.lock().insert(
            project.id(),
            BuiltModule {
                module_id: module,
                debug_info: MockDebugInfo { checksums },
            },
        );
    }

    /// Opening `project` fails with `error` until [`Self::heal`] is called.
    pub fn fail(&self, project: ProjectId, error: BaselineError) {
        self.failures.lock().insert(project, error);
    }

    pub fn heal(&self, project: ProjectId) {
        self.failures.lock().remove(&project);
    }

    /// Attempts to open a baseline, failed ones included.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl BaselineProvider for MockBaselineProvider {
    fn open_baseline(&self, project: &ProjectSnapshot) -> Result<ModuleBaselineData, BaselineError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().get(&project.id()) {
            return Err(error.clone());
        }
        let module = self
            .modules
            .lock()
            .get(&project.id())
            .cloned()
            .ok_or_else(|| BaselineError::NotBuilt(project.name().to_string()))?;
        Ok(ModuleBaselineData {
            module_id: module.module_id,
            metadata: Arc::from(b"metadata#0".to_vec()),
            debug_info: Box::new(module.debug_info),
        })
    }
}

/// Editor-tracked spans keyed by document path.
#[derive(Debug, Default)]
pub struct MockSpanProvider {
    spans: Mutex<HashMap<String, Vec<ActiveStatementSpan>>>,
}

impl MockSpanProvider {
    pub fn set_spans(&self, path: &str, spans: Vec<ActiveStatementSpan>) {
        self.spans.lock().insert(path.to_string(), spans);
    }
}

#[async_trait]
impl ActiveStatementSpanProvider for MockSpanProvider {
    async fn tracked_spans(
        &self,
        _document: DocumentId,
        path: &str,
        _cancel: CancellationToken,
    ) -> EncResult<Vec<ActiveStatementSpan>> {
        Ok(self.spans.lock().get(path).cloned().unwrap_or_default())
    }
}

/// One of each double, shared with the service under test.
#[derive(Debug, Clone, Default)]
pub struct MockServices {
    pub analyzer: Arc<MockAnalyzer>,
    pub emitter: Arc<MockEmitter>,
    pub debugger: Arc<MockDebugger>,
    pub baselines: Arc<MockBaselineProvider>,
    pub spans: Arc<MockSpanProvider>,
}

impl MockServices {
    pub fn services(&self) -> EncServices {
        EncServices {
            analyzer: self.analyzer.clone(),
            emitter: self.emitter.clone(),
            debugger: self.debugger.clone(),
            baselines: self.baselines.clone(),
        }
    }
}
