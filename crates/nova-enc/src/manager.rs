//! Registry of live debugging sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::active_statement::ActiveStatementSpan;
use crate::config::EncConfig;
use crate::diagnostics::EncDiagnostic;
use crate::edit_session::EmitSolutionUpdateResults;
use crate::error::{EncError, EncResult};
use crate::fault::{FaultReceiver, FaultReporter};
use crate::services::{
    ActiveStatementSpanProvider, ApplyUpdatesOutcome, EncServices, NoTrackedSpans,
};
use crate::session::{DebuggingSession, DebuggingSessionId, SessionOptions, SessionState};
use crate::solution::{DocumentId, DocumentSnapshot, Solution};
use crate::worker::Worker;

/// Entry point for hosts: starts, looks up and ends debugging sessions and
/// forwards every operation to the session it names.
pub struct EditAndContinueService {
    services: EncServices,
    config: EncConfig,
    span_provider: Arc<dyn ActiveStatementSpanProvider>,
    worker: Worker,
    faults: FaultReporter,
    sessions: Mutex<HashMap<DebuggingSessionId, Arc<DebuggingSession>>>,
    next_id: AtomicU32,
}

impl EditAndContinueService {
    pub fn new(services: EncServices, config: EncConfig, handle: Handle) -> Self {
        let worker = Worker::new(handle, config.analysis.max_concurrent_analyses);
        let faults = FaultReporter::new(config.faults.channel_capacity.max(1));
        Self {
            services,
            config,
            span_provider: Arc::new(NoTrackedSpans),
            worker,
            faults,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Source of editor-tracked active statement spans.
    pub fn with_span_provider(mut self, provider: Arc<dyn ActiveStatementSpanProvider>) -> Self {
        self.span_provider = provider;
        self
    }

    pub fn config(&self) -> &EncConfig {
        &self.config
    }

    /// Faults of every session started by this service.
    pub fn subscribe_faults(&self) -> FaultReceiver {
        self.faults.subscribe()
    }

    pub fn start_debugging_session(
        &self,
        solution: Solution,
        in_break_state: bool,
    ) -> DebuggingSessionId {
        let id = DebuggingSessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = DebuggingSession::start(
            id,
            solution,
            self.services.clone(),
            self.worker.clone(),
            self.faults.clone(),
            SessionOptions {
                in_break_state,
                validate_statement_order: self.config.analysis.validate_statement_order,
                span_provider: Arc::clone(&self.span_provider),
            },
        );
        self.sessions.lock().insert(id, Arc::new(session));
        id
    }

    pub fn session(&self, id: DebuggingSessionId) -> EncResult<Arc<DebuggingSession>> {
        self.sessions
            .lock()
            .get(&id)
            .cloned()
            .ok_or(EncError::SessionNotFound(id))
    }

    pub fn session_ids(&self) -> Vec<DebuggingSessionId> {
        let mut ids: Vec<_> = self.sessions.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn end_debugging_session(&self, id: DebuggingSessionId) -> EncResult<()> {
        let session = self
            .sessions
            .lock()
            .remove(&id)
            .ok_or(EncError::SessionNotFound(id))?;
        session.end_session().await
    }

    pub fn session_state(&self, id: DebuggingSessionId) -> EncResult<SessionState> {
        Ok(self.session(id)?.state())
    }

    pub fn break_state_changed(&self, id: DebuggingSessionId, in_break_state: bool) -> EncResult<()> {
        self.session(id)?.break_state_changed(in_break_state)
    }

    pub fn capabilities_changed(&self, id: DebuggingSessionId) -> EncResult<()> {
        self.session(id)?.capabilities_changed()
    }

    pub async fn emit_solution_update(
        &self,
        id: DebuggingSessionId,
        solution: &Solution,
        cancel: CancellationToken,
    ) -> EncResult<EmitSolutionUpdateResults> {
        self.session(id)?.emit_solution_update(solution, cancel).await
    }

    pub async fn commit_solution_update(&self, id: DebuggingSessionId) -> EncResult<()> {
        self.session(id)?.commit_solution_update().await
    }

    pub async fn discard_solution_update(&self, id: DebuggingSessionId) -> EncResult<()> {
        self.session(id)?.discard_solution_update().await
    }

    pub async fn apply_pending_update(
        &self,
        id: DebuggingSessionId,
        cancel: CancellationToken,
    ) -> EncResult<ApplyUpdatesOutcome> {
        self.session(id)?.apply_pending_update(cancel).await
    }

    pub async fn get_document_diagnostics(
        &self,
        id: DebuggingSessionId,
        document: &Arc<DocumentSnapshot>,
        cancel: CancellationToken,
    ) -> EncResult<Vec<EncDiagnostic>> {
        self.session(id)?
            .get_document_diagnostics(document, cancel)
            .await
    }

    pub async fn get_base_active_statement_spans(
        &self,
        id: DebuggingSessionId,
        document_ids: &[DocumentId],
        cancel: CancellationToken,
    ) -> EncResult<Vec<Vec<ActiveStatementSpan>>> {
        self.session(id)?
            .get_base_active_statement_spans(document_ids, cancel)
            .await
    }

    pub async fn get_adjusted_active_statement_spans(
        &self,
        id: DebuggingSessionId,
        document: &Arc<DocumentSnapshot>,
        cancel: CancellationToken,
    ) -> EncResult<Vec<ActiveStatementSpan>> {
        self.session(id)?
            .get_adjusted_active_statement_spans(document, cancel)
            .await
    }

    pub fn on_source_file_updated(
        &self,
        id: DebuggingSessionId,
        document: &Arc<DocumentSnapshot>,
    ) -> EncResult<bool> {
        self.session(id)?.on_source_file_updated(document)
    }
}

impl Drop for EditAndContinueService {
    fn drop(&mut self) {
        for (_, session) in self.sessions.get_mut().drain() {
            let _ = session.end_now();
        }
    }
}

impl std::fmt::Debug for EditAndContinueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditAndContinueService")
            .field("sessions", &self.sessions.lock().len())
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}
