//! Baseline snapshots of compiled projects and the readers backing them.
//!
//! Readers are owned by an arena that lives as long as the debugging session;
//! baselines refer to them by handle. A superseded baseline's readers stay
//! alive because later generations are deltas against them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::active_statement::ModuleId;
use crate::services::{BaselineError, BaselineProvider, DebugInfoReader};
use crate::solution::{ContentHash, ProjectId, ProjectSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaselineHandle(usize);

/// Compiled state of a module that the next delta is computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitBaseline {
    pub module_id: ModuleId,
    /// `0` for the module as built; incremented by every applied delta.
    pub generation: u32,
    pub metadata: Arc<[u8]>,
    /// Original module reader first, then one per applied delta.
    pub readers: Arc<[BaselineHandle]>,
}

impl EmitBaseline {
    /// The baseline that results from applying a delta with `metadata` on top
    /// of this one.
    pub fn next_generation(&self, metadata: Arc<[u8]>) -> Self {
        Self {
            module_id: self.module_id,
            generation: self.generation + 1,
            metadata,
            readers: Arc::clone(&self.readers),
        }
    }

    fn with_reader(&self, handle: BaselineHandle) -> Self {
        let mut readers = self.readers.to_vec();
        readers.push(handle);
        Self {
            readers: readers.into(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBaseline {
    pub project_id: ProjectId,
    pub emit: EmitBaseline,
}

#[derive(Debug, Default)]
struct BaselineArena {
    readers: Vec<Box<dyn DebugInfoReader>>,
}

impl BaselineArena {
    fn insert(&mut self, reader: Box<dyn DebugInfoReader>) -> BaselineHandle {
        self.readers.push(reader);
        BaselineHandle(self.readers.len() - 1)
    }

    fn get(&self, handle: BaselineHandle) -> Option<&dyn DebugInfoReader> {
        self.readers.get(handle.0).map(|reader| &**reader)
    }
}

#[derive(Debug, Default)]
struct Tables {
    arena: BaselineArena,
    baselines: HashMap<ProjectId, ProjectBaseline>,
    module_to_project: HashMap<ModuleId, ProjectId>,
    project_to_module: HashMap<ProjectId, ModuleId>,
}

/// Baseline table of a debugging session.
pub struct BaselineStore {
    provider: Arc<dyn BaselineProvider>,
    tables: Mutex<Tables>,
}

impl BaselineStore {
    pub fn new(provider: Arc<dyn BaselineProvider>) -> Self {
        Self {
            provider,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Current baseline of `project`, opening the compiled module on first
    /// use. Failures are returned but not remembered, so a later call observes
    /// a module built in the meantime.
    pub fn get_or_open(&self, project: &ProjectSnapshot) -> Result<ProjectBaseline, BaselineError> {
        if let Some(existing) = self.tables.lock().baselines.get(&project.id()) {
            return Ok(existing.clone());
        }

        let data = self.provider.open_baseline(project).map_err(|err| {
            tracing::debug!(
                target: "nova.enc.baseline",
                project = %project.id(),
                error = %err,
                "failed to open baseline"
            );
            err
        })?;

        let mut tables = self.tables.lock();
        if let Some(existing) = tables.baselines.get(&project.id()) {
            // Lost a race with another opener; its reader is the one kept.
            return Ok(existing.clone());
        }
        let handle = tables.arena.insert(data.debug_info);
        let baseline = ProjectBaseline {
            project_id: project.id(),
            emit: EmitBaseline {
                module_id: data.module_id,
                generation: 0,
                metadata: data.metadata,
                readers: Arc::from(vec![handle]),
            },
        };
        tables.module_to_project.insert(data.module_id, project.id());
        tables.project_to_module.insert(project.id(), data.module_id);
        tables.baselines.insert(project.id(), baseline.clone());
        tracing::debug!(
            target: "nova.enc.baseline",
            project = %project.id(),
            module = %data.module_id,
            "opened baseline"
        );
        Ok(baseline)
    }

    pub fn baseline(&self, project: ProjectId) -> Option<ProjectBaseline> {
        self.tables.lock().baselines.get(&project).cloned()
    }

    pub fn module_for_project(&self, project: ProjectId) -> Option<ModuleId> {
        self.tables.lock().project_to_module.get(&project).copied()
    }

    pub fn project_for_module(&self, module: ModuleId) -> Option<ProjectId> {
        self.tables.lock().module_to_project.get(&module).copied()
    }

    /// Checksum the module as built recorded for `path`.
    pub fn build_checksum(
        &self,
        project: &ProjectSnapshot,
        path: &str,
    ) -> Result<Option<ContentHash>, BaselineError> {
        let baseline = self.get_or_open(project)?;
        let tables = self.tables.lock();
        Ok(baseline
            .emit
            .readers
            .first()
            .and_then(|handle| tables.arena.get(*handle))
            .and_then(|reader| reader.document_checksum(path)))
    }

    /// Installs the baselines produced by a committed update. Delta readers
    /// move into the arena and are appended to their project's baseline.
    pub fn commit(
        &self,
        baselines: Vec<ProjectBaseline>,
        delta_readers: Vec<(ProjectId, Box<dyn DebugInfoReader>)>,
    ) {
        let mut tables = self.tables.lock();
        for baseline in baselines {
            tables.baselines.insert(baseline.project_id, baseline);
        }
        for (project, reader) in delta_readers {
            let handle = tables.arena.insert(reader);
            if let Some(baseline) = tables.baselines.get_mut(&project) {
                baseline.emit = baseline.emit.with_reader(handle);
            }
        }
    }

    pub fn reader_count(&self) -> usize {
        self.tables.lock().arena.readers.len()
    }

    /// Releases every reader and forgets all baselines. Returns the number of
    /// readers released.
    pub fn dispose(&self) -> usize {
        let mut tables = self.tables.lock();
        let released = tables.arena.readers.len();
        *tables = Tables::default();
        released
    }
}

impl std::fmt::Debug for BaselineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("BaselineStore")
            .field("baselines", &tables.baselines.len())
            .field("readers", &tables.arena.readers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ModuleBaselineData;
    use std::collections::VecDeque;

    #[derive(Debug)]
    struct FixedReader(Option<ContentHash>);

    impl DebugInfoReader for FixedReader {
        fn document_checksum(&self, _path: &str) -> Option<ContentHash> {
            self.0
        }
    }

    struct ScriptedProvider {
        answers: Mutex<VecDeque<Result<(), BaselineError>>>,
    }

    impl BaselineProvider for ScriptedProvider {
        fn open_baseline(
            &self,
            project: &ProjectSnapshot,
        ) -> Result<ModuleBaselineData, BaselineError> {
            self.answers.lock().pop_front().unwrap_or(Ok(()))?;
            Ok(ModuleBaselineData {
                module_id: ModuleId(u128::from(project.id().0)),
                metadata: Arc::from(vec![0u8; 4]),
                debug_info: Box::new(FixedReader(Some(ContentHash::of_text("built")))),
            })
        }
    }

    fn store(answers: Vec<Result<(), BaselineError>>) -> BaselineStore {
        BaselineStore::new(Arc::new(ScriptedProvider {
            answers: Mutex::new(answers.into()),
        }))
    }

    #[test]
    fn open_failures_are_retried() {
        let store = store(vec![Err(BaselineError::Locked("app.dll".into()))]);
        let project = ProjectSnapshot::new(ProjectId(3), "app");

        assert_eq!(
            store.get_or_open(&project),
            Err(BaselineError::Locked("app.dll".into()))
        );
        assert!(store.baseline(ProjectId(3)).is_none());

        let baseline = store.get_or_open(&project).unwrap();
        assert_eq!(baseline.emit.generation, 0);
        assert_eq!(store.module_for_project(ProjectId(3)), Some(ModuleId(3)));
        assert_eq!(store.project_for_module(ModuleId(3)), Some(ProjectId(3)));
        assert_eq!(
            store.build_checksum(&project, "a.cs").unwrap(),
            Some(ContentHash::of_text("built"))
        );
    }

    #[test]
    fn committed_deltas_keep_earlier_readers_alive() {
        let store = store(Vec::new());
        let project = ProjectSnapshot::new(ProjectId(1), "app");
        let base = store.get_or_open(&project).unwrap();

        let next = ProjectBaseline {
            project_id: ProjectId(1),
            emit: base.emit.next_generation(Arc::from(vec![1u8])),
        };
        store.commit(vec![next], vec![(ProjectId(1), Box::new(FixedReader(None)))]);

        let current = store.baseline(ProjectId(1)).unwrap();
        assert_eq!(current.emit.generation, 1);
        assert_eq!(current.emit.readers.len(), 2);
        assert_eq!(store.reader_count(), 2);

        assert_eq!(store.dispose(), 2);
        assert_eq!(store.reader_count(), 0);
        assert!(store.baseline(ProjectId(1)).is_none());
    }
}
