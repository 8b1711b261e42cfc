//! Immutable solution/project/document snapshots consumed by the session.
//!
//! Snapshots are shared behind `Arc`; identity comparisons (`Arc::ptr_eq`)
//! are how the analysis cache decides whether its inputs are unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::span::{LinePositionSpan, SourceFileSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub u32);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentId {
    pub project: ProjectId,
    pub index: u32,
}

impl DocumentId {
    pub const fn new(project: ProjectId, index: u32) -> Self {
        Self { project, index }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/doc#{}", self.project, self.index)
    }
}

/// SHA-256 of a document's text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of_text(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash(")?;
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// A `#line`-style section: `unmapped` in this document maps to `mapped`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineMappingSection {
    pub unmapped: LinePositionSpan,
    pub mapped: SourceFileSpan,
}

#[derive(Debug)]
pub struct DocumentSnapshot {
    id: DocumentId,
    path: Arc<str>,
    text: Arc<str>,
    checksum: ContentHash,
    design_time_only: bool,
    line_mappings: Arc<[LineMappingSection]>,
}

impl DocumentSnapshot {
    pub fn new(id: DocumentId, path: impl Into<Arc<str>>, text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        Self {
            id,
            path: path.into(),
            checksum: ContentHash::of_text(&text),
            text,
            design_time_only: false,
            line_mappings: Arc::from(Vec::new()),
        }
    }

    /// Marks the document as never compiled into the debuggee.
    pub fn design_time_only(mut self) -> Self {
        self.design_time_only = true;
        self
    }

    pub fn with_line_mappings(mut self, sections: Vec<LineMappingSection>) -> Self {
        self.line_mappings = sections.into();
        self
    }

    /// A new snapshot of the same document with different text. Line mappings
    /// are kept; callers supply new ones when directives moved.
    pub fn with_text(&self, text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        Self {
            id: self.id,
            path: Arc::clone(&self.path),
            checksum: ContentHash::of_text(&text),
            text,
            design_time_only: self.design_time_only,
            line_mappings: Arc::clone(&self.line_mappings),
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn path(&self) -> &Arc<str> {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn checksum(&self) -> ContentHash {
        self.checksum
    }

    pub fn is_design_time_only(&self) -> bool {
        self.design_time_only
    }

    pub fn has_line_directives(&self) -> bool {
        !self.line_mappings.is_empty()
    }

    /// Mapped sections of this document. A document without directives is a
    /// single identity section covering everything.
    pub fn mapped_sections(&self) -> Vec<LineMappingSection> {
        if self.line_mappings.is_empty() {
            let everything = LinePositionSpan::from_coords(0, 0, i32::MAX, i32::MAX);
            return vec![LineMappingSection {
                unmapped: everything,
                mapped: SourceFileSpan::new(Arc::clone(&self.path), everything),
            }];
        }
        self.line_mappings.to_vec()
    }
}

#[derive(Debug)]
pub struct ProjectSnapshot {
    id: ProjectId,
    name: Arc<str>,
    supports_edit_and_continue: bool,
    documents: BTreeMap<DocumentId, Arc<DocumentSnapshot>>,
}

impl ProjectSnapshot {
    pub fn new(id: ProjectId, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
            supports_edit_and_continue: true,
            documents: BTreeMap::new(),
        }
    }

    pub fn without_edit_and_continue(mut self) -> Self {
        self.supports_edit_and_continue = false;
        self
    }

    pub fn with_document(&self, document: Arc<DocumentSnapshot>) -> Self {
        let mut documents = self.documents.clone();
        documents.insert(document.id(), document);
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            supports_edit_and_continue: self.supports_edit_and_continue,
            documents,
        }
    }

    pub fn without_document(&self, id: DocumentId) -> Self {
        let mut documents = self.documents.clone();
        documents.remove(&id);
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            supports_edit_and_continue: self.supports_edit_and_continue,
            documents,
        }
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports_edit_and_continue(&self) -> bool {
        self.supports_edit_and_continue
    }

    pub fn document(&self, id: DocumentId) -> Option<&Arc<DocumentSnapshot>> {
        self.documents.get(&id)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<DocumentSnapshot>> {
        self.documents.values()
    }

    pub fn find_document_by_path(&self, path: &str) -> Option<&Arc<DocumentSnapshot>> {
        self.documents.values().find(|doc| &**doc.path() == path)
    }
}

/// Document-level difference between two versions of a project.
#[derive(Debug, Clone)]
pub enum DocumentChange {
    Added(Arc<DocumentSnapshot>),
    Changed {
        old: Arc<DocumentSnapshot>,
        new: Arc<DocumentSnapshot>,
    },
    Removed(Arc<DocumentSnapshot>),
}

impl DocumentChange {
    pub fn document_id(&self) -> DocumentId {
        match self {
            DocumentChange::Added(doc) | DocumentChange::Removed(doc) => doc.id(),
            DocumentChange::Changed { new, .. } => new.id(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Solution {
    projects: BTreeMap<ProjectId, Arc<ProjectSnapshot>>,
}

impl Solution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(&self, project: Arc<ProjectSnapshot>) -> Self {
        let mut projects = self.projects.clone();
        projects.insert(project.id(), project);
        Self { projects }
    }

    /// Replaces the text of an existing document, producing a new snapshot of
    /// the document and its project. Returns `None` for unknown documents.
    pub fn with_document_text(&self, id: DocumentId, text: impl Into<Arc<str>>) -> Option<Self> {
        let project = self.projects.get(&id.project)?;
        let document = project.document(id)?;
        let document = Arc::new(document.with_text(text));
        Some(self.with_project(Arc::new(project.with_document(document))))
    }

    pub fn with_document(&self, document: DocumentSnapshot) -> Option<Self> {
        let project = self.projects.get(&document.id().project)?;
        Some(self.with_project(Arc::new(project.with_document(Arc::new(document)))))
    }

    pub fn project(&self, id: ProjectId) -> Option<&Arc<ProjectSnapshot>> {
        self.projects.get(&id)
    }

    pub fn projects(&self) -> impl Iterator<Item = &Arc<ProjectSnapshot>> {
        self.projects.values()
    }

    pub fn document(&self, id: DocumentId) -> Option<&Arc<DocumentSnapshot>> {
        self.projects.get(&id.project)?.document(id)
    }

    /// Documents of `project` that differ from `old`. Snapshots shared by both
    /// sides are skipped without comparing text.
    pub fn document_changes(old: &ProjectSnapshot, new: &ProjectSnapshot) -> Vec<DocumentChange> {
        let mut changes = Vec::new();
        for new_doc in new.documents() {
            match old.document(new_doc.id()) {
                None => changes.push(DocumentChange::Added(Arc::clone(new_doc))),
                Some(old_doc) if Arc::ptr_eq(old_doc, new_doc) => {}
                Some(old_doc) if old_doc.checksum() == new_doc.checksum() => {}
                Some(old_doc) => changes.push(DocumentChange::Changed {
                    old: Arc::clone(old_doc),
                    new: Arc::clone(new_doc),
                }),
            }
        }
        for old_doc in old.documents() {
            if new.document(old_doc.id()).is_none() {
                changes.push(DocumentChange::Removed(Arc::clone(old_doc)));
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solution() -> Solution {
        let project_id = ProjectId(1);
        let project = ProjectSnapshot::new(project_id, "app")
            .with_document(Arc::new(DocumentSnapshot::new(
                DocumentId::new(project_id, 0),
                "a.cs",
                "class A {}",
            )))
            .with_document(Arc::new(DocumentSnapshot::new(
                DocumentId::new(project_id, 1),
                "b.cs",
                "class B {}",
            )));
        Solution::new().with_project(Arc::new(project))
    }

    #[test]
    fn document_changes_ignore_identical_text() {
        let old = solution();
        let a = DocumentId::new(ProjectId(1), 0);
        let b = DocumentId::new(ProjectId(1), 1);

        let same_text = old.with_document_text(a, "class A {}").expect("known document");
        let changes = Solution::document_changes(
            old.project(ProjectId(1)).unwrap(),
            same_text.project(ProjectId(1)).unwrap(),
        );
        assert!(changes.is_empty());

        let edited = old.with_document_text(b, "class B { int x; }").unwrap();
        let changes = Solution::document_changes(
            old.project(ProjectId(1)).unwrap(),
            edited.project(ProjectId(1)).unwrap(),
        );
        assert_eq!(changes.len(), 1);
        assert!(matches!(&changes[0], DocumentChange::Changed { new, .. } if new.id() == b));
    }

    #[test]
    fn documents_without_directives_have_one_identity_section() {
        let old = solution();
        let doc = old.document(DocumentId::new(ProjectId(1), 0)).unwrap();
        let sections = doc.mapped_sections();
        assert_eq!(sections.len(), 1);
        assert_eq!(&*sections[0].mapped.path, "a.cs");
        assert_eq!(sections[0].unmapped, sections[0].mapped.span);
    }

    #[test]
    fn checksum_tracks_text() {
        let a = ContentHash::of_text("x");
        assert_eq!(a, ContentHash::of_text("x"));
        assert_ne!(a, ContentHash::of_text("y"));
    }
}
