use std::collections::BTreeMap;
use std::sync::Arc;

use nova_enc::{
    ActiveStatementDebugInfo, ActiveStatementFlags, DocumentId, DocumentSnapshot,
    LinePosition, LinePositionSpan, ManagedInstructionId, ManagedMethodId, ModuleId, ProjectId,
    ProjectSnapshot, Solution, ThreadId,
};

/// Source text with `<AS:N>`...`</AS:N>` markers around active statements.
///
/// Returns the text with markers removed and the span of every marker pair,
/// indexed by `N`.
pub fn extract_active_statements(fixture: &str) -> (String, BTreeMap<u32, LinePositionSpan>) {
    let mut text = String::with_capacity(fixture.len());
    let mut starts: BTreeMap<u32, LinePosition> = BTreeMap::new();
    let mut spans = BTreeMap::new();
    let mut position = LinePosition::new(0, 0);

    let mut rest = fixture;
    while !rest.is_empty() {
        if let Some((id, closing, len)) = parse_marker(rest) {
            if closing {
                let start = starts
                    .remove(&id)
                    .unwrap_or_else(|| panic!("</AS:{id}> without matching <AS:{id}>"));
                let previous = spans.insert(id, LinePositionSpan::new(start, position));
                assert!(previous.is_none(), "duplicate active statement marker {id}");
            } else {
                assert!(
                    starts.insert(id, position).is_none(),
                    "nested <AS:{id}> markers"
                );
            }
            rest = &rest[len..];
            continue;
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };
        text.push(ch);
        if ch == '\n' {
            position = LinePosition::new(position.line + 1, 0);
        } else {
            position.character += 1;
        }
        rest = &rest[ch.len_utf8()..];
    }

    assert!(starts.is_empty(), "unclosed active statement markers: {starts:?}");
    (text, spans)
}

fn parse_marker(text: &str) -> Option<(u32, bool, usize)> {
    let (closing, body) = if let Some(body) = text.strip_prefix("</AS:") {
        (true, body)
    } else {
        (false, text.strip_prefix("<AS:")?)
    };
    let end = body.find('>')?;
    let id = body[..end].parse().ok()?;
    let prefix = if closing { "</AS:".len() } else { "<AS:".len() };
    Some((id, closing, prefix + end + 1))
}

/// A one-project fixture with `//- /path` headers separating documents.
///
/// ```text
/// //- /a.cs
/// class C { void F() { <AS:0>G();</AS:0> } }
/// //- /b.cs
/// class D { }
/// ```
#[derive(Debug, Clone)]
pub struct Fixture {
    pub project: Arc<ProjectSnapshot>,
    active_statements: BTreeMap<u32, (DocumentId, LinePositionSpan)>,
}

impl Fixture {
    #[must_use]
    pub fn parse(project: ProjectId, name: &str, fixture: &str) -> Self {
        let mut files: Vec<(String, String)> = Vec::new();
        for line in fixture.lines() {
            if let Some(path) = line.strip_prefix("//-") {
                files.push((path.trim().trim_start_matches('/').to_string(), String::new()));
                continue;
            }
            let Some((_, text)) = files.last_mut() else {
                panic!("fixture text before the first `//- /path` header");
            };
            text.push_str(line);
            text.push('\n');
        }

        let mut snapshot = ProjectSnapshot::new(project, name);
        let mut active_statements = BTreeMap::new();
        for (index, (path, marked)) in files.into_iter().enumerate() {
            let id = DocumentId::new(project, index as u32);
            let (text, spans) = extract_active_statements(&marked);
            for (ordinal, span) in spans {
                let previous = active_statements.insert(ordinal, (id, span));
                assert!(previous.is_none(), "<AS:{ordinal}> used in two documents");
            }
            snapshot = snapshot.with_document(Arc::new(DocumentSnapshot::new(id, path, text)));
        }
        Self {
            project: Arc::new(snapshot),
            active_statements,
        }
    }

    pub fn document(&self, path: &str) -> Arc<DocumentSnapshot> {
        self.project
            .find_document_by_path(path)
            .cloned()
            .unwrap_or_else(|| panic!("fixture has no document {path}"))
    }

    /// Span of `<AS:ordinal>`.
    pub fn span(&self, ordinal: u32) -> LinePositionSpan {
        self.active_statements
            .get(&ordinal)
            .map(|(_, span)| *span)
            .unwrap_or_else(|| panic!("fixture has no <AS:{ordinal}>"))
    }

    /// Debugger record placing `method`'s instruction at `offset` on `<AS:ordinal>`.
    pub fn record(
        &self,
        ordinal: u32,
        method: ManagedMethodId,
        offset: u32,
        flags: ActiveStatementFlags,
    ) -> ActiveStatementDebugInfo {
        let (document, span) = self
            .active_statements
            .get(&ordinal)
            .copied()
            .unwrap_or_else(|| panic!("fixture has no <AS:{ordinal}>"));
        let path = self
            .project
            .document(document)
            .map(|document| Arc::clone(document.path()))
            .unwrap_or_else(|| panic!("fixture lost document {document}"));
        statement_record(method, offset, Some(path), span, flags)
    }

    pub fn solution(&self) -> Solution {
        Solution::new().with_project(Arc::clone(&self.project))
    }
}

pub fn statement_record(
    method: ManagedMethodId,
    offset: u32,
    document_name: Option<Arc<str>>,
    span: LinePositionSpan,
    flags: ActiveStatementFlags,
) -> ActiveStatementDebugInfo {
    ActiveStatementDebugInfo {
        instruction_id: ManagedInstructionId::new(method, offset),
        document_name,
        source_span: span,
        thread_ids: vec![ThreadId(1)],
        flags,
    }
}

pub fn method(module: ModuleId, token: u32, version: u32) -> ManagedMethodId {
    ManagedMethodId::new(module, token, version)
}

/// Leaf frame in the latest version of its method.
pub fn leaf_up_to_date() -> ActiveStatementFlags {
    ActiveStatementFlags::LEAF_FRAME | ActiveStatementFlags::METHOD_UP_TO_DATE
}

/// Replaces the text of document `path` in the only project of `solution`.
pub fn edit(solution: &Solution, path: &str, text: &str) -> Solution {
    let document = solution
        .projects()
        .find_map(|project| project.find_document_by_path(path))
        .unwrap_or_else(|| panic!("solution has no document {path}"));
    solution
        .with_document_text(document.id(), text)
        .unwrap_or_else(|| panic!("document {path} vanished"))
}
