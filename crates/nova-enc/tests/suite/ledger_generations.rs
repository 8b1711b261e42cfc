use std::sync::Arc;

use nova_enc::{ActiveStatementFlags, Body, LinePositionSpan, ModuleUpdateStatus, StatementBody};
use nova_test_utils::{edit, leaf_up_to_date, AnalysisScript};
use pretty_assertions::assert_eq;

use super::support::{a_cs, eventually, span_at, statement_line, TestSession, MODULE, PROJECT};

#[tokio::test]
async fn stale_thread_resolves_through_applied_line_move() {
    let session = TestSession::start(true);
    assert_eq!(session.base_spans().await, vec![span_at(3, leaf_up_to_date())]);

    session.mocks.analyzer.script(
        session.doc_a(),
        AnalysisScript::body_update("C.F").with_line_update(3, 5),
    );
    let gen1 = edit(&session.fixture.solution(), "a.cs", &a_cs(2));
    let results = session.emit(&gen1).await.unwrap();

    assert_eq!(results.status, ModuleUpdateStatus::Ready);
    assert_eq!(results.module_updates.len(), 1);
    let update = &results.module_updates[0];
    assert_eq!(update.module, MODULE);
    assert_eq!(update.active_statements.len(), 1);
    assert_eq!(update.active_statements[0].il_offset, 10);
    assert_eq!(update.active_statements[0].new_span.span, statement_line(5));

    session.service.commit_solution_update(session.id).await.unwrap();
    eventually(|| session.mocks.debugger.prepared_modules() == vec![MODULE]).await;

    session.report_stale_thread();
    session.service.break_state_changed(session.id, true).unwrap();
    assert_eq!(
        session.base_spans().await,
        vec![span_at(5, ActiveStatementFlags::LEAF_FRAME)]
    );
}

#[tokio::test]
async fn corrections_compose_across_generations() {
    let session = TestSession::start(true);
    let analyzer = &session.mocks.analyzer;

    analyzer.script(
        session.doc_a(),
        AnalysisScript::body_update("C.F").with_line_update(3, 5),
    );
    let gen1 = edit(&session.fixture.solution(), "a.cs", &a_cs(2));
    session.emit(&gen1).await.unwrap();
    session.service.commit_solution_update(session.id).await.unwrap();

    session.report_stale_thread();
    session.service.break_state_changed(session.id, true).unwrap();

    analyzer.script(
        session.doc_a(),
        AnalysisScript::body_update("C.F").with_line_update(5, 8),
    );
    let gen2 = edit(&gen1, "a.cs", &a_cs(5));
    let results = session.emit(&gen2).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::Ready);
    assert_eq!(
        results.module_updates[0].active_statements[0].new_span.span,
        statement_line(8)
    );
    session.service.commit_solution_update(session.id).await.unwrap();

    let debugging = session.service.session(session.id).unwrap();
    assert_eq!(debugging.non_remappable_regions().len(), 2);
    // The second delta is computed against the first one.
    assert_eq!(
        session.mocks.emitter.calls(),
        vec![(PROJECT, 0), (PROJECT, 1)]
    );

    session.service.break_state_changed(session.id, true).unwrap();
    assert_eq!(
        session.base_spans().await,
        vec![span_at(8, ActiveStatementFlags::LEAF_FRAME)]
    );
    eventually(|| session.mocks.debugger.prepared_modules() == vec![MODULE]).await;
}

#[tokio::test]
async fn update_without_body_changes_keeps_ledger() {
    let session = TestSession::start(true);

    session.mocks.analyzer.script(
        session.doc_a(),
        AnalysisScript::body_update("C.F").with_line_update(3, 5),
    );
    let gen1 = edit(&session.fixture.solution(), "a.cs", &a_cs(2));
    session.emit(&gen1).await.unwrap();
    session.service.commit_solution_update(session.id).await.unwrap();

    let debugging = session.service.session(session.id).unwrap();
    let before = debugging.non_remappable_regions();
    assert_eq!(before.len(), 1);

    session
        .mocks
        .analyzer
        .script(session.doc_b(), AnalysisScript::body_update("D"));
    let gen2 = edit(&gen1, "b.cs", "class D\n{\n    // helper, reworded\n}\n");
    let results = session.emit(&gen2).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::Ready);
    session.service.commit_solution_update(session.id).await.unwrap();

    assert!(Arc::ptr_eq(&before, &debugging.non_remappable_regions()));

    session.report_stale_thread();
    session.service.break_state_changed(session.id, true).unwrap();
    assert_eq!(
        session.base_spans().await,
        vec![span_at(5, ActiveStatementFlags::LEAF_FRAME)]
    );
}

#[tokio::test]
async fn active_statement_follows_its_statement_into_the_new_body() {
    let session = TestSession::start(true);
    let old_body = StatementBody::new(
        LinePositionSpan::from_coords(2, 4, 5, 5),
        [statement_line(3)],
    );
    let new_body = StatementBody::new(
        LinePositionSpan::from_coords(2, 4, 7, 5),
        [statement_line(5)],
    );
    session.mocks.analyzer.script(
        session.doc_a(),
        AnalysisScript::body_update("C.F")
            .with_bodies(Body::Member(old_body), Body::Member(new_body)),
    );

    let results = session
        .emit(&edit(&session.fixture.solution(), "a.cs", &a_cs(2)))
        .await
        .unwrap();

    assert_eq!(results.status, ModuleUpdateStatus::Ready);
    let update = &results.module_updates[0];
    assert_eq!(update.active_statements.len(), 1);
    assert_eq!(update.active_statements[0].new_span.span, statement_line(5));
}
