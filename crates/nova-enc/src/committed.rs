//! The solution as last applied to the debuggee, with per-document sync state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::baseline::BaselineStore;
use crate::services::BaselineError;
use crate::solution::{DocumentId, DocumentSnapshot, Solution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentState {
    /// Not part of the committed solution; treated as added.
    None,
    /// Content differs from what the module was built from.
    OutOfSync,
    MatchesBuildOutput,
    /// Never compiled into the module.
    DesignTimeOnly,
}

#[derive(Debug)]
pub struct CommittedSolution {
    solution: RwLock<Arc<Solution>>,
    states: Mutex<HashMap<DocumentId, DocumentState>>,
}

impl CommittedSolution {
    pub fn new(solution: Solution) -> Self {
        Self {
            solution: RwLock::new(Arc::new(solution)),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn solution(&self) -> Arc<Solution> {
        Arc::clone(&self.solution.read())
    }

    pub fn state(&self, id: DocumentId) -> Option<DocumentState> {
        self.states.lock().get(&id).copied()
    }

    /// The committed snapshot of `id` and its state. The snapshot is only
    /// returned when it can serve as the old side of an analysis.
    ///
    /// Baseline errors are not remembered; the next call retries.
    pub fn document_and_state(
        &self,
        id: DocumentId,
        baselines: &BaselineStore,
    ) -> Result<(Option<Arc<DocumentSnapshot>>, DocumentState), BaselineError> {
        let solution = self.solution();
        let Some(project) = solution.project(id.project) else {
            return Ok((None, DocumentState::None));
        };
        let Some(document) = project.document(id) else {
            return Ok((None, DocumentState::None));
        };
        if document.is_design_time_only() {
            return Ok((None, DocumentState::DesignTimeOnly));
        }

        let known = self.state(id);
        let state = match known {
            Some(state) => state,
            None => {
                let state = match baselines.build_checksum(project, document.path())? {
                    Some(checksum) if checksum == document.checksum() => {
                        DocumentState::MatchesBuildOutput
                    }
                    Some(_) => DocumentState::OutOfSync,
                    None => DocumentState::DesignTimeOnly,
                };
                tracing::debug!(
                    target: "nova.enc",
                    document = %id,
                    ?state,
                    "resolved committed document state"
                );
                self.states.lock().insert(id, state);
                state
            }
        };

        let document = match state {
            DocumentState::MatchesBuildOutput => Some(Arc::clone(document)),
            _ => None,
        };
        Ok((document, state))
    }

    /// Re-checks a document the host saw change on disk. When its content now
    /// matches the build output it replaces the committed snapshot.
    pub fn on_source_file_updated(
        &self,
        document: &Arc<DocumentSnapshot>,
        baselines: &BaselineStore,
    ) -> Result<bool, BaselineError> {
        let id = document.id();
        if matches!(
            self.state(id),
            Some(DocumentState::MatchesBuildOutput | DocumentState::DesignTimeOnly)
        ) {
            return Ok(false);
        }

        let solution = self.solution();
        let Some(project) = solution.project(id.project) else {
            return Ok(false);
        };
        if baselines.build_checksum(project, document.path())? != Some(document.checksum()) {
            return Ok(false);
        }

        let updated = project.with_document(Arc::clone(document));
        *self.solution.write() = Arc::new(solution.with_project(Arc::new(updated)));
        self.states
            .lock()
            .insert(id, DocumentState::MatchesBuildOutput);
        tracing::debug!(target: "nova.enc", document = %id, "document back in sync with build output");
        Ok(true)
    }

    /// Advances to `solution` after an update was applied. Documents in
    /// `applied` match the debuggee from now on.
    pub fn commit(&self, solution: Solution, applied: impl IntoIterator<Item = DocumentId>) {
        *self.solution.write() = Arc::new(solution);
        let mut states = self.states.lock();
        for id in applied {
            states.insert(id, DocumentState::MatchesBuildOutput);
        }
    }
}
