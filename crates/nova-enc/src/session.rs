//! Debugging session: the run/break/pending-update state machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::active_statement::ActiveStatementSpan;
use crate::baseline::BaselineStore;
use crate::diagnostics::EncDiagnostic;
use crate::edit_session::{
    EditSession, EmitSolutionUpdateResults, PendingSolutionUpdate, SessionContext,
};
use crate::error::{ConsistencyError, EncError, EncResult};
use crate::fault::{FaultReceiver, FaultReporter};
use crate::regions::NonRemappableRegionLedger;
use crate::services::{ActiveStatementSpanProvider, ApplyUpdatesOutcome, EncServices};
use crate::solution::{DocumentId, DocumentSnapshot, Solution};
use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DebuggingSessionId(pub u32);

impl fmt::Display for DebuggingSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Break,
    PendingUpdate,
}

/// Options a debugging session is started with.
#[derive(Clone)]
pub struct SessionOptions {
    pub in_break_state: bool,
    pub validate_statement_order: bool,
    pub span_provider: Arc<dyn ActiveStatementSpanProvider>,
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("in_break_state", &self.in_break_state)
            .field("validate_statement_order", &self.validate_statement_order)
            .finish_non_exhaustive()
    }
}

pub struct DebuggingSession {
    context: Arc<SessionContext>,
    edit_session: RwLock<Arc<EditSession>>,
    pending: Mutex<Option<PendingSolutionUpdate>>,
    /// Held for the whole of emit, commit, discard, apply and end, so at most
    /// one transition runs at a time.
    transition: tokio::sync::Mutex<()>,
    ended: AtomicBool,
}

impl DebuggingSession {
    pub fn start(
        id: DebuggingSessionId,
        solution: Solution,
        services: EncServices,
        worker: Worker,
        faults: FaultReporter,
        options: SessionOptions,
    ) -> Self {
        let context = Arc::new(SessionContext::new(
            id,
            solution,
            services,
            options.span_provider,
            worker,
            faults,
            options.validate_statement_order,
        ));
        tracing::info!(
            target: "nova.enc.session",
            session = %id,
            in_break_state = options.in_break_state,
            "debugging session started"
        );
        Self {
            edit_session: RwLock::new(Arc::new(EditSession::new(
                Arc::clone(&context),
                options.in_break_state,
            ))),
            context,
            pending: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
            ended: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> DebuggingSessionId {
        self.context.id
    }

    pub fn state(&self) -> SessionState {
        if self.pending.lock().is_some() {
            SessionState::PendingUpdate
        } else if self.edit_session().in_break_state() {
            SessionState::Break
        } else {
            SessionState::Running
        }
    }

    /// The current edit session. Callers keep using the snapshot they got even
    /// if it is replaced concurrently.
    pub fn edit_session(&self) -> Arc<EditSession> {
        Arc::clone(&self.edit_session.read())
    }

    pub fn non_remappable_regions(&self) -> Arc<NonRemappableRegionLedger> {
        self.context.ledger()
    }

    pub fn committed_solution(&self) -> Arc<Solution> {
        self.context.committed.solution()
    }

    /// Baselines and the debug-info readers backing them.
    pub fn baselines(&self) -> &BaselineStore {
        &self.context.baselines
    }

    pub fn subscribe_faults(&self) -> FaultReceiver {
        self.context.faults.subscribe()
    }

    fn ensure_active(&self) -> EncResult<()> {
        if self.ended.load(Ordering::Acquire) {
            return Err(EncError::SessionEnded);
        }
        Ok(())
    }

    async fn begin_transition(
        &self,
        cancel: &CancellationToken,
    ) -> EncResult<tokio::sync::MutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EncError::Cancelled),
            guard = self.transition.lock() => Ok(guard),
        }
    }

    fn replace_edit_session(&self, in_break_state: bool) {
        let next = Arc::new(EditSession::new(Arc::clone(&self.context), in_break_state));
        let previous = std::mem::replace(&mut *self.edit_session.write(), next);
        previous.end();
    }

    /// The debuggee entered or left break state.
    pub fn break_state_changed(&self, in_break_state: bool) -> EncResult<()> {
        self.ensure_active()?;
        tracing::debug!(
            target: "nova.enc.session",
            session = %self.id(),
            in_break_state,
            "break state changed"
        );
        self.replace_edit_session(in_break_state);
        Ok(())
    }

    /// The runtime's capabilities may have changed; they are queried again.
    pub fn capabilities_changed(&self) -> EncResult<()> {
        self.ensure_active()?;
        let in_break_state = self.edit_session().in_break_state();
        self.replace_edit_session(in_break_state);
        Ok(())
    }

    /// Computes the update from the committed solution to `solution` and, when
    /// it can be applied, stages it.
    pub async fn emit_solution_update(
        &self,
        solution: &Solution,
        cancel: CancellationToken,
    ) -> EncResult<EmitSolutionUpdateResults> {
        let result = self.emit_solution_update_inner(solution, cancel).await;
        self.context.faults.observe("emit_solution_update", result)
    }

    async fn emit_solution_update_inner(
        &self,
        solution: &Solution,
        cancel: CancellationToken,
    ) -> EncResult<EmitSolutionUpdateResults> {
        let _transition = self.begin_transition(&cancel).await?;
        self.ensure_active()?;
        if self.pending.lock().is_some() {
            return Err(ConsistencyError::PendingUpdateExists.into());
        }

        let update = self
            .edit_session()
            .emit_solution_update(solution, &cancel)
            .await?;
        // The session may have been abandoned while the update was computed.
        self.ensure_active()?;
        if let Some(pending) = update.pending {
            *self.pending.lock() = Some(pending);
        }
        Ok(update.results)
    }

    /// Makes the staged update the new committed state.
    pub async fn commit_solution_update(&self) -> EncResult<()> {
        let _transition = self.transition.lock().await;
        let result = self.commit_locked();
        self.context.faults.observe("commit_solution_update", result)
    }

    fn commit_locked(&self) -> EncResult<()> {
        self.ensure_active()?;
        let pending = self
            .pending
            .lock()
            .take()
            .ok_or(ConsistencyError::NoPendingUpdate)?;

        let applied = pending.applied_documents.len();
        self.context
            .baselines
            .commit(pending.project_baselines, pending.delta_readers);

        if pending.non_remappable_regions.is_empty() {
            tracing::debug!(
                target: "nova.enc.session",
                session = %self.id(),
                "no method bodies changed; keeping non-remappable regions"
            );
        } else {
            let mut ledger = self.context.ledger.write();
            let merged = ledger.merge(&pending.non_remappable_regions, &pending.line_updates);
            *ledger = Arc::new(merged);
        }

        self.context
            .committed
            .commit(pending.solution, pending.applied_documents);
        self.replace_edit_session(false);

        tracing::info!(
            target: "nova.enc.session",
            session = %self.id(),
            modules = pending.module_updates.len(),
            documents = applied,
            "solution update committed"
        );
        Ok(())
    }

    /// Drops the staged update; baselines and the ledger are left untouched.
    pub async fn discard_solution_update(&self) -> EncResult<()> {
        let _transition = self.transition.lock().await;
        let result = self.discard_locked();
        self.context.faults.observe("discard_solution_update", result)
    }

    fn discard_locked(&self) -> EncResult<()> {
        self.ensure_active()?;
        self.pending
            .lock()
            .take()
            .ok_or(ConsistencyError::NoPendingUpdate)?;
        tracing::info!(target: "nova.enc.session", session = %self.id(), "solution update discarded");
        Ok(())
    }

    /// Sends the staged update to the runtime, committing it if applied and
    /// discarding it if rejected.
    pub async fn apply_pending_update(
        &self,
        cancel: CancellationToken,
    ) -> EncResult<ApplyUpdatesOutcome> {
        let result = self.apply_inner(cancel).await;
        self.context.faults.observe("apply_pending_update", result)
    }

    async fn apply_inner(&self, cancel: CancellationToken) -> EncResult<ApplyUpdatesOutcome> {
        // The staged update cannot change until the runtime has answered.
        let _transition = self.begin_transition(&cancel).await?;
        self.ensure_active()?;
        let updates = self
            .pending
            .lock()
            .as_ref()
            .map(|pending| pending.module_updates.clone())
            .ok_or(ConsistencyError::NoPendingUpdate)?;

        let outcome = self
            .context
            .services
            .debugger
            .apply_updates(&updates, cancel)
            .await?;
        self.ensure_active()?;
        match &outcome {
            ApplyUpdatesOutcome::Applied => self.commit_locked()?,
            ApplyUpdatesOutcome::Rejected(reason) => {
                tracing::warn!(
                    target: "nova.enc.session",
                    session = %self.id(),
                    reason = %reason,
                    "runtime rejected the update"
                );
                self.discard_locked()?;
            }
        }
        Ok(outcome)
    }

    /// Ends the session, releasing every baseline reader. A staged update is
    /// dropped. Waits for a transition in progress to finish.
    pub async fn end_session(&self) -> EncResult<()> {
        let _transition = self.transition.lock().await;
        self.end_now()
    }

    /// Ends the session without waiting for a running transition; that
    /// transition then fails with [`EncError::SessionEnded`] instead of
    /// committing.
    pub(crate) fn end_now(&self) -> EncResult<()> {
        if self.ended.swap(true, Ordering::AcqRel) {
            return Err(EncError::SessionEnded);
        }
        let edit_session = self.edit_session();
        edit_session.end();
        edit_session.cancel_analyses();
        let discarded = self.pending.lock().take().is_some();
        let released = self.context.baselines.dispose();
        self.context.clear_prepared_modules();
        tracing::info!(
            target: "nova.enc.session",
            session = %self.id(),
            released_readers = released,
            discarded_pending_update = discarded,
            "debugging session ended"
        );
        Ok(())
    }

    pub async fn get_document_diagnostics(
        &self,
        document: &Arc<DocumentSnapshot>,
        cancel: CancellationToken,
    ) -> EncResult<Vec<EncDiagnostic>> {
        self.ensure_active()?;
        let result = self
            .edit_session()
            .get_document_diagnostics(document, &cancel)
            .await;
        self.context.faults.observe("get_document_diagnostics", result)
    }

    /// Base active statement spans of each of `document_ids`, in the committed
    /// version of the document.
    pub async fn get_base_active_statement_spans(
        &self,
        document_ids: &[DocumentId],
        cancel: CancellationToken,
    ) -> EncResult<Vec<Vec<ActiveStatementSpan>>> {
        self.ensure_active()?;
        let result = self
            .edit_session()
            .get_base_active_statement_spans(document_ids, &cancel)
            .await;
        self.context
            .faults
            .observe("get_base_active_statement_spans", result)
    }

    pub async fn get_adjusted_active_statement_spans(
        &self,
        document: &Arc<DocumentSnapshot>,
        cancel: CancellationToken,
    ) -> EncResult<Vec<ActiveStatementSpan>> {
        self.ensure_active()?;
        let result = self
            .edit_session()
            .get_adjusted_active_statement_spans(document, &cancel)
            .await;
        self.context
            .faults
            .observe("get_adjusted_active_statement_spans", result)
    }

    /// Returns `true` when `document` is back in sync with the build output.
    pub fn on_source_file_updated(&self, document: &Arc<DocumentSnapshot>) -> EncResult<bool> {
        self.ensure_active()?;
        Ok(self
            .context
            .committed
            .on_source_file_updated(document, &self.context.baselines)
            .unwrap_or(false))
    }
}

impl fmt::Debug for DebuggingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebuggingSession")
            .field("id", &self.context.id)
            .field("state", &self.state())
            .field("ended", &self.ended.load(Ordering::Relaxed))
            .finish()
    }
}
