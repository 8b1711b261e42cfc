//! Declaration bodies and the operations analyzers map active statements
//! through.
//!
//! A thread can only be stopped inside a body: a member (method, accessor,
//! constructor), a lambda, or a field/property initializer. Each kind exposes
//! its root span and the statements a thread can be stopped at through
//! [`DeclarationBody`]; matching an active statement from the old version of a
//! body to the new one is built on top of those.

use crate::span::LinePositionSpan;

/// Kind of body a semantic edit touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    Member,
    Lambda,
    FieldInitializer,
    PropertyInitializer,
}

impl BodyKind {
    /// Edits to member and lambda bodies replace compiled method bodies;
    /// initializer edits are folded into the constructors instead.
    pub fn replaces_method_body(self) -> bool {
        matches!(self, BodyKind::Member | BodyKind::Lambda)
    }
}

pub trait DeclarationBody {
    /// Span of the whole body.
    fn root_span(&self) -> LinePositionSpan;

    /// Spans a thread can be stopped at, in source order.
    fn active_tokens(&self) -> &[LinePositionSpan];

    /// Index of the innermost token covering `span`.
    fn find_statement(&self, span: &LinePositionSpan) -> Option<usize> {
        self.active_tokens()
            .iter()
            .enumerate()
            .filter(|(_, token)| token.contains(span))
            .max_by(|(_, a), (_, b)| a.start.cmp(&b.start).then_with(|| b.end.cmp(&a.end)))
            .map(|(idx, _)| idx)
    }

    /// Span in `new` of the statement covering `span` in `self`. Statements
    /// match by ordinal; `None` when `span` is outside every statement or
    /// `new` has fewer of them.
    fn match_statement(
        &self,
        new: &dyn DeclarationBody,
        span: &LinePositionSpan,
    ) -> Option<LinePositionSpan> {
        let idx = self.find_statement(span)?;
        new.active_tokens().get(idx).copied()
    }
}

/// Body made of statements: a member or a lambda.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementBody {
    root: LinePositionSpan,
    statements: Vec<LinePositionSpan>,
}

impl StatementBody {
    pub fn new(root: LinePositionSpan, statements: impl IntoIterator<Item = LinePositionSpan>) -> Self {
        let mut statements: Vec<_> = statements
            .into_iter()
            .filter(|statement| root.contains(statement))
            .collect();
        statements.sort_by(LinePositionSpan::cmp_by_start);
        Self { root, statements }
    }
}

impl DeclarationBody for StatementBody {
    fn root_span(&self) -> LinePositionSpan {
        self.root
    }

    fn active_tokens(&self) -> &[LinePositionSpan] {
        &self.statements
    }
}

/// Initializer expression; the expression itself is the only place a thread
/// can be stopped at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializerBody {
    expression: [LinePositionSpan; 1],
}

impl InitializerBody {
    pub fn new(expression: LinePositionSpan) -> Self {
        Self {
            expression: [expression],
        }
    }
}

impl DeclarationBody for InitializerBody {
    fn root_span(&self) -> LinePositionSpan {
        self.expression[0]
    }

    fn active_tokens(&self) -> &[LinePositionSpan] {
        &self.expression
    }
}

/// A body of one of the [`BodyKind`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Member(StatementBody),
    Lambda(StatementBody),
    FieldInitializer(InitializerBody),
    PropertyInitializer(InitializerBody),
}

impl Body {
    pub fn kind(&self) -> BodyKind {
        match self {
            Body::Member(_) => BodyKind::Member,
            Body::Lambda(_) => BodyKind::Lambda,
            Body::FieldInitializer(_) => BodyKind::FieldInitializer,
            Body::PropertyInitializer(_) => BodyKind::PropertyInitializer,
        }
    }

    fn inner(&self) -> &dyn DeclarationBody {
        match self {
            Body::Member(body) | Body::Lambda(body) => body,
            Body::FieldInitializer(body) | Body::PropertyInitializer(body) => body,
        }
    }

    /// Like [`DeclarationBody::match_statement`], but bodies of different
    /// kinds never match.
    pub fn match_active_statement(
        &self,
        new: &Body,
        span: &LinePositionSpan,
    ) -> Option<LinePositionSpan> {
        if self.kind() != new.kind() {
            return None;
        }
        self.inner().match_statement(new.inner(), span)
    }
}

impl DeclarationBody for Body {
    fn root_span(&self) -> LinePositionSpan {
        self.inner().root_span()
    }

    fn active_tokens(&self) -> &[LinePositionSpan] {
        self.inner().active_tokens()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start_line: i32, start: i32, end_line: i32, end: i32) -> LinePositionSpan {
        LinePositionSpan::from_coords(start_line, start, end_line, end)
    }

    fn method() -> StatementBody {
        // void F() {
        //     if (x) {
        //         G();
        //     }
        //     H();
        // }
        StatementBody::new(
            span(2, 4, 7, 5),
            [span(6, 8, 6, 12), span(3, 8, 5, 9), span(4, 12, 4, 16)],
        )
    }

    #[test]
    fn tokens_are_ordered_and_confined_to_the_root() {
        let body = StatementBody::new(span(2, 4, 4, 5), [span(3, 8, 3, 12), span(9, 0, 9, 4)]);
        assert_eq!(body.active_tokens(), &[span(3, 8, 3, 12)]);
        assert_eq!(body.root_span(), span(2, 4, 4, 5));

        let body = method();
        assert_eq!(
            body.active_tokens(),
            &[span(3, 8, 5, 9), span(4, 12, 4, 16), span(6, 8, 6, 12)]
        );
    }

    #[test]
    fn innermost_statement_covers_the_active_span() {
        let body = method();
        assert_eq!(body.find_statement(&span(4, 12, 4, 16)), Some(1));
        assert_eq!(body.find_statement(&span(3, 8, 3, 10)), Some(0));
        assert_eq!(body.find_statement(&span(0, 0, 0, 1)), None);
    }

    #[test]
    fn statements_match_by_ordinal() {
        let old = Body::Member(method());
        let new = Body::Member(StatementBody::new(
            span(2, 4, 9, 5),
            [span(3, 8, 6, 9), span(5, 12, 5, 20), span(7, 8, 7, 12)],
        ));
        assert_eq!(
            old.match_active_statement(&new, &span(4, 12, 4, 16)),
            Some(span(5, 12, 5, 20))
        );

        let shorter = Body::Member(StatementBody::new(span(2, 4, 4, 5), [span(3, 8, 3, 12)]));
        assert_eq!(old.match_active_statement(&shorter, &span(6, 8, 6, 12)), None);
    }

    #[test]
    fn bodies_of_different_kinds_never_match() {
        let lambda = Body::Lambda(method());
        let member = Body::Member(method());
        assert_eq!(lambda.match_active_statement(&member, &span(4, 12, 4, 16)), None);

        let field = Body::FieldInitializer(InitializerBody::new(span(1, 10, 1, 20)));
        let property = Body::PropertyInitializer(InitializerBody::new(span(1, 10, 1, 20)));
        assert_eq!(field.match_active_statement(&property, &span(1, 12, 1, 14)), None);
        assert_eq!(
            field.match_active_statement(
                &Body::FieldInitializer(InitializerBody::new(span(2, 10, 2, 30))),
                &span(1, 12, 1, 14)
            ),
            Some(span(2, 10, 2, 30))
        );
    }

    #[test]
    fn only_member_and_lambda_edits_replace_method_bodies() {
        assert!(BodyKind::Member.replaces_method_body());
        assert!(BodyKind::Lambda.replaces_method_body());
        assert!(!BodyKind::FieldInitializer.replaces_method_body());
        assert!(!BodyKind::PropertyInitializer.replaces_method_body());
    }
}
