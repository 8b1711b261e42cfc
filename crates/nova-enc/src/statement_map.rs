//! Active statement index: the runtime's active statements grouped by
//! document, sorted by position, with ledger corrections applied.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::active_statement::{
    ActiveStatement, ActiveStatementDebugInfo, ActiveStatementExceptionRegions,
    ActiveStatementFlags, ActiveStatementId, ManagedInstructionId, UnmappedActiveStatement,
};
use crate::error::{ConsistencyError, EncResult};
use crate::regions::NonRemappableRegionLedger;
use crate::services::EditAndContinueAnalyzer;
use crate::solution::{ContentHash, DocumentId, DocumentSnapshot};
use crate::span::{self, LinePositionSpan, SourceFileSpan};

type UnmappedKey = (DocumentId, ContentHash);

#[derive(Debug, Default)]
pub struct ActiveStatementsMap {
    documents: HashMap<Arc<str>, Arc<[Arc<ActiveStatement>]>>,
    by_instruction: HashMap<ManagedInstructionId, Arc<ActiveStatement>>,
    ledger: Arc<NonRemappableRegionLedger>,
    unmapped: Mutex<HashMap<UnmappedKey, Arc<[UnmappedActiveStatement]>>>,
}

impl ActiveStatementsMap {
    /// The index outside break state.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the index from the records reported by the debugger.
    ///
    /// Each record keeps the position it had in `records` as its id, so ids
    /// stay stable across rebuilds from the same runtime state.
    pub fn create(
        records: &[ActiveStatementDebugInfo],
        ledger: Arc<NonRemappableRegionLedger>,
    ) -> EncResult<Self> {
        let mut by_path: HashMap<Arc<str>, Vec<Arc<ActiveStatement>>> = HashMap::new();
        let mut by_instruction: HashMap<ManagedInstructionId, Arc<ActiveStatement>> =
            HashMap::with_capacity(records.len());

        for (ordinal, record) in records.iter().enumerate() {
            let Some(path) = record.document_name.as_ref().filter(|_| record.has_source_location())
            else {
                tracing::trace!(
                    target: "nova.enc",
                    instruction = %record.instruction_id,
                    "dropping active statement without source location"
                );
                continue;
            };

            let id = ActiveStatementId(ordinal as u32);
            let raw = SourceFileSpan::new(Arc::clone(path), record.source_span);
            let file_span = if record.flags.contains(ActiveStatementFlags::METHOD_UP_TO_DATE) {
                raw
            } else {
                ledger.up_to_date_span(&record.instruction_id.method, &raw)
            };

            let statement = Arc::new(ActiveStatement::new(
                id,
                record.flags,
                file_span,
                record.instruction_id,
            ));

            if let Some(first) = by_instruction.get(&record.instruction_id) {
                return Err(ConsistencyError::DuplicateInstructionId {
                    instruction: record.instruction_id,
                    first: first.id,
                    second: id,
                }
                .into());
            }
            by_instruction.insert(record.instruction_id, Arc::clone(&statement));
            by_path
                .entry(Arc::clone(&statement.file_span.path))
                .or_default()
                .push(statement);
        }

        let documents = by_path
            .into_iter()
            .map(|(path, mut statements)| {
                statements.sort_by(|a, b| a.span().cmp_by_start(&b.span()).then(a.id.cmp(&b.id)));
                (path, Arc::from(statements))
            })
            .collect();

        Ok(Self {
            documents,
            by_instruction,
            ledger,
            unmapped: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.by_instruction.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_instruction.len()
    }

    pub fn ledger(&self) -> &Arc<NonRemappableRegionLedger> {
        &self.ledger
    }

    /// Statements whose mapped location is in `path`, sorted by start.
    pub fn statements_in_document(&self, path: &str) -> &[Arc<ActiveStatement>] {
        self.documents.get(path).map(|s| &s[..]).unwrap_or(&[])
    }

    pub fn document_paths(&self) -> impl Iterator<Item = &Arc<str>> {
        self.documents.keys()
    }

    pub fn by_instruction(&self, id: &ManagedInstructionId) -> Option<&Arc<ActiveStatement>> {
        self.by_instruction.get(id)
    }

    /// All statements ordered by id.
    pub fn statements(&self) -> Vec<Arc<ActiveStatement>> {
        let mut all: Vec<_> = self.by_instruction.values().cloned().collect();
        all.sort_by_key(|statement| statement.id);
        all
    }

    /// Checks that every per-document array is sorted by start position.
    pub fn validate_ordering(&self) -> EncResult<()> {
        for (path, statements) in &self.documents {
            let sorted = statements
                .windows(2)
                .all(|pair| pair[0].span().start <= pair[1].span().start);
            if !sorted {
                return Err(ConsistencyError::UnsortedActiveStatements {
                    path: path.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Active statements of the committed `document`, projected into its
    /// unmapped coordinates. Computed once per document content.
    pub fn old_active_statements(
        &self,
        analyzer: &dyn EditAndContinueAnalyzer,
        document: &DocumentSnapshot,
    ) -> Arc<[UnmappedActiveStatement]> {
        if self.is_empty() {
            return Arc::from(Vec::new());
        }

        let key = (document.id(), document.checksum());
        if let Some(cached) = self.unmapped.lock().get(&key) {
            return Arc::clone(cached);
        }

        let computed: Arc<[UnmappedActiveStatement]> =
            self.compute_unmapped(analyzer, document).into();
        // Racing computations produce equal results; keep the first.
        Arc::clone(self.unmapped.lock().entry(key).or_insert(computed))
    }

    fn compute_unmapped(
        &self,
        analyzer: &dyn EditAndContinueAnalyzer,
        document: &DocumentSnapshot,
    ) -> Vec<UnmappedActiveStatement> {
        let mut result = Vec::new();
        for section in document.mapped_sections() {
            let statements = self.statements_in_document(&section.mapped.path);
            let range = get_overlapping_spans(&section.mapped.span, statements, |s| s.span());
            for statement in &statements[range] {
                let unmapped_span = span::reverse_map_line_position_span(
                    &section.unmapped,
                    &section.mapped.span,
                    &statement.span(),
                );
                let exception_regions = if statement.is_method_up_to_date() {
                    analyzer.exception_regions(document, unmapped_span, statement.is_non_leaf())
                } else {
                    ActiveStatementExceptionRegions::new(
                        self.ledger
                            .exception_region_spans(&statement.instruction_id.method),
                        false,
                    )
                };
                result.push(UnmappedActiveStatement {
                    unmapped_span,
                    statement: Arc::clone(statement),
                    exception_regions,
                });
            }
        }
        result.sort_by(|a, b| {
            a.unmapped_span
                .cmp_by_start(&b.unmapped_span)
                .then(a.statement.id.cmp(&b.statement.id))
        });
        result
    }
}

/// Index range of the elements of `sorted` that overlap `target`.
///
/// `sorted` must be ordered by start position. The scan skips to the first
/// overlapping element and stops at the first one after it that does not
/// overlap; the returned range is empty when nothing overlaps.
pub fn get_overlapping_spans<T>(
    target: &LinePositionSpan,
    sorted: &[T],
    span_of: impl Fn(&T) -> LinePositionSpan,
) -> Range<usize> {
    let Some(start) = sorted
        .iter()
        .position(|item| span::overlaps(target, &span_of(item)))
    else {
        return 0..0;
    };
    let end = sorted[start..]
        .iter()
        .position(|item| !span::overlaps(target, &span_of(item)))
        .map_or(sorted.len(), |offset| start + offset);
    start..end
}
