//! Memoized per-document analyses.
//!
//! Each document has at most one entry: the inputs it was computed from and a
//! shared, possibly still running, computation. Requests with identical inputs
//! join the existing computation; any difference replaces the entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::active_statement::{ActiveStatementId, ActiveStatementSpan, UnmappedActiveStatement};
use crate::capabilities::EditAndContinueCapabilities;
use crate::error::{ConsistencyError, EncError, EncResult};
use crate::services::{DocumentAnalysisRequest, DocumentAnalysisResults, EditAndContinueAnalyzer};
use crate::solution::{DocumentId, DocumentSnapshot, ProjectSnapshot};
use crate::span::{self, LinePositionSpan};
use crate::worker::Worker;

type SharedAnalysis = Shared<BoxFuture<'static, EncResult<Arc<DocumentAnalysisResults>>>>;

struct Entry {
    generation: u64,
    old_project: Arc<ProjectSnapshot>,
    new_document: Arc<DocumentSnapshot>,
    spans: Arc<[LinePositionSpan]>,
    capabilities: EditAndContinueCapabilities,
    analysis: SharedAnalysis,
    token: CancellationToken,
}

impl Entry {
    fn matches(
        &self,
        old_project: &Arc<ProjectSnapshot>,
        new_document: &Arc<DocumentSnapshot>,
        spans: &[LinePositionSpan],
        capabilities: EditAndContinueCapabilities,
    ) -> bool {
        Arc::ptr_eq(&self.old_project, old_project)
            && Arc::ptr_eq(&self.new_document, new_document)
            && *self.spans == *spans
            && self.capabilities == capabilities
    }
}

/// Inputs of one analysis request.
#[derive(Debug, Clone)]
pub struct AnalysisInputs {
    pub old_project: Arc<ProjectSnapshot>,
    pub old_document: Option<Arc<DocumentSnapshot>>,
    pub new_document: Arc<DocumentSnapshot>,
    pub old_active_statements: Arc<[UnmappedActiveStatement]>,
    /// Editor-tracked spans of the active statements, in mapped coordinates.
    pub tracked_spans: Vec<ActiveStatementSpan>,
    pub capabilities: EditAndContinueCapabilities,
}

pub struct DocumentAnalysesCache {
    analyzer: Arc<dyn EditAndContinueAnalyzer>,
    worker: Worker,
    entries: Mutex<HashMap<DocumentId, Entry>>,
    next_generation: AtomicU64,
}

impl DocumentAnalysesCache {
    pub fn new(analyzer: Arc<dyn EditAndContinueAnalyzer>, worker: Worker) -> Self {
        Self {
            analyzer,
            worker,
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub async fn get_document_analysis(
        &self,
        inputs: AnalysisInputs,
        cancel: CancellationToken,
    ) -> EncResult<Arc<DocumentAnalysisResults>> {
        if cancel.is_cancelled() {
            return Err(EncError::Cancelled);
        }

        let id = inputs.new_document.id();
        let spans: Arc<[LinePositionSpan]> = resolve_active_statement_spans(
            &inputs.old_active_statements,
            &inputs.new_document,
            &inputs.tracked_spans,
        )
        .into();
        let (generation, analysis) = self.get_or_start(id, inputs, spans);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EncError::Cancelled),
            result = analysis => result,
        };
        if result.is_err() {
            self.evict_if_current(id, generation);
        }
        result
    }

    fn get_or_start(
        &self,
        id: DocumentId,
        inputs: AnalysisInputs,
        spans: Arc<[LinePositionSpan]>,
    ) -> (u64, SharedAnalysis) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&id) {
            if entry.matches(
                &inputs.old_project,
                &inputs.new_document,
                &spans,
                inputs.capabilities,
            ) {
                tracing::trace!(target: "nova.enc.analysis", document = %id, "analysis cache hit");
                return (entry.generation, entry.analysis.clone());
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let analysis = self.start(id, &inputs, Arc::clone(&spans), token.clone());
        let entry = Entry {
            generation,
            old_project: inputs.old_project,
            new_document: inputs.new_document,
            spans,
            capabilities: inputs.capabilities,
            analysis: analysis.clone(),
            token,
        };
        if let Some(replaced) = entries.insert(id, entry) {
            tracing::trace!(
                target: "nova.enc.analysis",
                document = %id,
                "analysis inputs changed; abandoning previous computation"
            );
            replaced.token.cancel();
        }
        (generation, analysis)
    }

    fn start(
        &self,
        id: DocumentId,
        inputs: &AnalysisInputs,
        spans: Arc<[LinePositionSpan]>,
        token: CancellationToken,
    ) -> SharedAnalysis {
        let expected = inputs.old_active_statements.len();
        let request = DocumentAnalysisRequest {
            old_project: Arc::clone(&inputs.old_project),
            old_document: inputs.old_document.clone(),
            new_document: Arc::clone(&inputs.new_document),
            old_active_statements: Arc::clone(&inputs.old_active_statements),
            new_active_statement_spans: spans,
            capabilities: inputs.capabilities,
        };
        let analyzer = Arc::clone(&self.analyzer);
        let task = self.worker.spawn_with_token(token, move |token| async move {
            tracing::debug!(target: "nova.enc.analysis", document = %id, "analyzing document");
            analyzer.analyze_document(request, token).await
        });

        async move {
            let results = task.join().await?.withhold_if_not_compiling();
            if !results.has_compilation_errors && results.active_statements.len() != expected {
                return Err(ConsistencyError::MismatchedActiveStatementCount {
                    document: id,
                    expected,
                    actual: results.active_statements.len(),
                }
                .into());
            }
            Ok(Arc::new(results))
        }
        .boxed()
        .shared()
    }

    fn evict_if_current(&self, id: DocumentId, generation: u64) {
        let mut entries = self.entries.lock();
        if entries.get(&id).is_some_and(|entry| entry.generation == generation) {
            entries.remove(&id);
        }
    }

    /// Abandons every in-flight computation.
    pub fn cancel_all(&self) {
        for (_, entry) in self.entries.lock().drain() {
            entry.token.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DocumentAnalysesCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentAnalysesCache")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// Spans of `old_active_statements` in `new_document`, in its unmapped
/// coordinates.
///
/// Without line directives the editor-tracked span is used directly, falling
/// back to the old span for untracked statements. With directives each
/// statement's current mapped location is translated through the section that
/// contains it; a statement outside every section gets an empty span.
pub fn resolve_active_statement_spans(
    old_active_statements: &[UnmappedActiveStatement],
    new_document: &DocumentSnapshot,
    tracked_spans: &[ActiveStatementSpan],
) -> Vec<LinePositionSpan> {
    let tracked: HashMap<ActiveStatementId, LinePositionSpan> = tracked_spans
        .iter()
        .map(|span| (span.id, span.line_span))
        .collect();

    if !new_document.has_line_directives() {
        return old_active_statements
            .iter()
            .map(|old| {
                tracked
                    .get(&old.statement.id)
                    .copied()
                    .unwrap_or(old.unmapped_span)
            })
            .collect();
    }

    let sections = new_document.mapped_sections();
    old_active_statements
        .iter()
        .map(|old| {
            let current = tracked
                .get(&old.statement.id)
                .copied()
                .unwrap_or_else(|| old.statement.span());
            sections
                .iter()
                .find(|section| {
                    *section.mapped.path == *old.statement.path()
                        && section.mapped.span.contains(&current)
                })
                .map(|section| {
                    span::reverse_map_line_position_span(
                        &section.unmapped,
                        &section.mapped.span,
                        &current,
                    )
                })
                .unwrap_or_default()
        })
        .collect()
}
