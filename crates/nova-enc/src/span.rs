//! Line/column span algebra shared by active statement tracking and
//! non-remappable region correction.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A zero-based (line, character) position.
///
/// Positions are ordered lexicographically by `(line, character)`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LinePosition {
    pub line: i32,
    pub character: i32,
}

impl LinePosition {
    #[inline]
    pub const fn new(line: i32, character: i32) -> Self {
        Self { line, character }
    }
}

impl fmt::Display for LinePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.line, self.character)
    }
}

/// A half-open `[start, end)` span of line positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LinePositionSpan {
    pub start: LinePosition,
    pub end: LinePosition,
}

impl LinePositionSpan {
    #[inline]
    pub const fn new(start: LinePosition, end: LinePosition) -> Self {
        Self { start, end }
    }

    /// Shorthand for `((start_line, start_char), (end_line, end_char))`.
    #[inline]
    pub const fn from_coords(
        start_line: i32,
        start_character: i32,
        end_line: i32,
        end_character: i32,
    ) -> Self {
        Self {
            start: LinePosition::new(start_line, start_character),
            end: LinePosition::new(end_line, end_character),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn contains(&self, span: &LinePositionSpan) -> bool {
        contains(self, span)
    }

    #[inline]
    pub fn overlaps(&self, other: &LinePositionSpan) -> bool {
        overlaps(self, other)
    }

    #[inline]
    pub fn add_line_delta(&self, delta: i32) -> LinePositionSpan {
        add_line_delta(self, delta)
    }

    /// Number of lines the span covers; `0` for spans on a single line.
    #[inline]
    pub fn line_count(&self) -> i32 {
        self.end.line - self.start.line
    }

    /// Orders spans by start position, then by end position.
    pub fn cmp_by_start(&self, other: &LinePositionSpan) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl fmt::Display for LinePositionSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// `true` iff `span` lies entirely within `container`.
#[inline]
pub fn contains(container: &LinePositionSpan, span: &LinePositionSpan) -> bool {
    span.start >= container.start && span.end <= container.end
}

/// Interval overlap on the `(line, character)` ordering: the spans share at
/// least one position. Empty spans overlap nothing.
pub fn overlaps(a: &LinePositionSpan, b: &LinePositionSpan) -> bool {
    a.start.max(b.start) < a.end.min(b.end)
}

/// Shifts both endpoints by `delta` lines, preserving characters.
#[inline]
pub fn add_line_delta(span: &LinePositionSpan, delta: i32) -> LinePositionSpan {
    LinePositionSpan {
        start: LinePosition::new(span.start.line + delta, span.start.character),
        end: LinePosition::new(span.end.line + delta, span.end.character),
    }
}

/// Line distance between the starts of two spans.
#[inline]
pub fn line_delta(old: &LinePositionSpan, new: &LinePositionSpan) -> i32 {
    new.start.line - old.start.line
}

/// Translates `mapped_span`, located inside a `#line`-mapped section, back to
/// the section's unmapped coordinates.
///
/// Lines shift by the distance between the section starts. Characters on the
/// section's first line shift by the distance between the section's start
/// characters; characters on other lines are kept.
pub fn reverse_map_line_position_span(
    unmapped_section: &LinePositionSpan,
    mapped_section: &LinePositionSpan,
    mapped_span: &LinePositionSpan,
) -> LinePositionSpan {
    let line_difference = unmapped_section.start.line - mapped_section.start.line;
    let map = |position: LinePosition| {
        let character = if position.line == mapped_section.start.line {
            unmapped_section.start.character + position.character - mapped_section.start.character
        } else {
            position.character
        };
        LinePosition::new(position.line + line_difference, character)
    };
    LinePositionSpan::new(map(mapped_span.start), map(mapped_span.end))
}

/// A span qualified by the path of the file it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFileSpan {
    pub path: Arc<str>,
    pub span: LinePositionSpan,
}

impl SourceFileSpan {
    pub fn new(path: impl Into<Arc<str>>, span: LinePositionSpan) -> Self {
        Self {
            path: path.into(),
            span,
        }
    }

    pub fn with_span(&self, span: LinePositionSpan) -> Self {
        Self {
            path: Arc::clone(&self.path),
            span,
        }
    }

    /// Same path and the span lies within `self`.
    pub fn contains(&self, other: &SourceFileSpan) -> bool {
        self.path == other.path && self.span.contains(&other.span)
    }

    pub fn add_line_delta(&self, delta: i32) -> Self {
        self.with_span(self.span.add_line_delta(delta))
    }
}

impl fmt::Display for SourceFileSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.span)
    }
}

/// A single sequence-point line update produced by the analyzer for one file.
///
/// Lines from `old_line` up to the next update's `old_line` shift by
/// `new_line - old_line`. An update with `new_line == old_line` ends the
/// preceding shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLineUpdate {
    pub old_line: i32,
    pub new_line: i32,
}

impl SourceLineUpdate {
    pub const fn new(old_line: i32, new_line: i32) -> Self {
        Self { old_line, new_line }
    }

    #[inline]
    pub fn delta(&self) -> i32 {
        self.new_line - self.old_line
    }
}

/// All line updates for one file, sorted by `old_line`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequencePointUpdates {
    pub file_name: Arc<str>,
    pub line_updates: Vec<SourceLineUpdate>,
}

impl SequencePointUpdates {
    pub fn new(file_name: impl Into<Arc<str>>, mut line_updates: Vec<SourceLineUpdate>) -> Self {
        line_updates.sort_by_key(|update| update.old_line);
        Self {
            file_name: file_name.into(),
            line_updates,
        }
    }

    /// Line delta that applies to `line`, `0` when no update covers it.
    pub fn delta_for_line(&self, line: i32) -> i32 {
        let idx = self
            .line_updates
            .partition_point(|update| update.old_line <= line);
        match idx.checked_sub(1) {
            Some(idx) => self.line_updates[idx].delta(),
            None => 0,
        }
    }

    /// Maps `span` through the updates, keyed on its start line.
    pub fn map_span(&self, span: &LinePositionSpan) -> LinePositionSpan {
        span.add_line_delta(self.delta_for_line(span.start.line))
    }
}
