use std::time::Duration;

use nova_enc::{
    ActiveStatementId, EditAndContinueCapabilities, EncError, LinePositionSpan, SessionState,
};
use nova_test_utils::{edit, leaf_up_to_date, method, statement_record, AnalysisScript, Fixture};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use super::support::{a_cs, TestSession, MODULE, PROJECT};

const TWO_CALLS: &str = "//- /a.cs
class C
{
    void F() {
        <AS:0>G();</AS:0>
    }
    void G() {
        <AS:1>H();</AS:1>
    }
}
";

#[tokio::test]
async fn ordinals_are_stable_across_break_states() {
    let fixture = Fixture::parse(PROJECT, "app", TWO_CALLS);
    let solution = fixture.solution();
    let session = TestSession::start_with(fixture, solution, true);
    // The first record has no source location and is dropped, but still
    // consumes ordinal 0.
    session.mocks.debugger.set_active_statements(vec![
        statement_record(
            method(MODULE, 0x0600_0001, 1),
            4,
            None,
            LinePositionSpan::default(),
            leaf_up_to_date(),
        ),
        session
            .fixture
            .record(1, method(MODULE, 0x0600_0007, 1), 2, leaf_up_to_date()),
        session
            .fixture
            .record(0, method(MODULE, 0x0600_0006, 1), 6, leaf_up_to_date()),
    ]);

    let first = session.base_spans().await;
    let ids: Vec<_> = first.iter().map(|span| span.id).collect();
    assert_eq!(ids, vec![ActiveStatementId(2), ActiveStatementId(1)]);
    assert_eq!(first[0].line_span, session.fixture.span(0));
    assert_eq!(first[1].line_span, session.fixture.span(1));

    session.service.break_state_changed(session.id, false).unwrap();
    assert_eq!(
        session.service.session_state(session.id).unwrap(),
        SessionState::Running
    );
    assert!(session.base_spans().await.is_empty());

    session.service.break_state_changed(session.id, true).unwrap();
    assert_eq!(session.base_spans().await, first);
    assert_eq!(session.mocks.debugger.active_statement_queries(), 2);
}

#[tokio::test]
async fn base_spans_are_memoized_within_a_break_state() {
    let session = TestSession::start(true);
    let first = session.base_spans().await;
    assert_eq!(first.len(), 1);
    assert_eq!(session.base_spans().await, first);
    assert_eq!(session.mocks.debugger.active_statement_queries(), 1);
}

#[tokio::test]
async fn capabilities_are_queried_again_after_a_change() {
    let session = TestSession::start(true);
    let cancel = CancellationToken::new();
    let handle = session.service.session(session.id).unwrap();
    let before = handle.edit_session().capabilities(&cancel).await.unwrap();
    assert!(before.contains(EditAndContinueCapabilities::NEW_TYPE_DEFINITION));

    session.mocks.debugger.set_capabilities(&["Baseline"]);
    // Still the value of the current edit session.
    assert_eq!(
        handle.edit_session().capabilities(&cancel).await.unwrap(),
        before
    );

    session.service.capabilities_changed(session.id).unwrap();
    let after = handle.edit_session().capabilities(&cancel).await.unwrap();
    assert_eq!(after, EditAndContinueCapabilities::BASELINE);
    assert_eq!(
        session.service.session_state(session.id).unwrap(),
        SessionState::Break
    );
}

#[tokio::test]
async fn ending_a_session_releases_its_readers() {
    let session = TestSession::start(false);
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));
    session.emit(&edited).await.unwrap();
    session.service.commit_solution_update(session.id).await.unwrap();

    let handle = session.service.session(session.id).unwrap();
    assert_eq!(handle.baselines().reader_count(), 2);

    session.service.end_debugging_session(session.id).await.unwrap();
    assert_eq!(handle.baselines().reader_count(), 0);
    assert!(session.service.session_ids().is_empty());
    assert_eq!(
        session.service.session(session.id).unwrap_err(),
        EncError::SessionNotFound(session.id)
    );
    assert_eq!(
        session.service.end_debugging_session(session.id).await.unwrap_err(),
        EncError::SessionNotFound(session.id)
    );
    assert_eq!(handle.end_session().await.unwrap_err(), EncError::SessionEnded);
    assert_eq!(
        handle.commit_solution_update().await.unwrap_err(),
        EncError::SessionEnded
    );
}

#[tokio::test]
async fn ending_a_session_drops_the_staged_update() {
    let session = TestSession::start(false);
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));
    session.emit(&edited).await.unwrap();
    let handle = session.service.session(session.id).unwrap();
    assert_eq!(handle.state(), SessionState::PendingUpdate);

    session.service.end_debugging_session(session.id).await.unwrap();
    assert_eq!(handle.state(), SessionState::Running);
    assert!(session.mocks.debugger.applied_updates().is_empty());
}

#[tokio::test]
async fn sessions_get_distinct_ids() {
    let session = TestSession::start(false);
    let other = session
        .service
        .start_debugging_session(session.fixture.solution(), true);
    assert_ne!(other, session.id);
    assert_eq!(session.service.session_ids(), vec![session.id, other]);
    assert_eq!(
        session.service.session_state(other).unwrap(),
        SessionState::Break
    );
}

#[tokio::test]
async fn failed_prepare_hint_is_reported_as_a_fault() {
    let session = TestSession::start(false);
    let mut faults = session.service.subscribe_faults();
    session.mocks.debugger.fail_prepare();
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));

    // The hint is fire-and-forget; the update is still staged.
    let results = session.emit(&edited).await.unwrap();
    assert_eq!(results.status, nova_enc::ModuleUpdateStatus::Ready);

    let report = tokio::time::timeout(Duration::from_secs(5), faults.recv())
        .await
        .expect("fault was not reported")
        .unwrap();
    assert_eq!(report.operation, "prepare_module_for_update");
    assert!(matches!(report.error, EncError::Debugger(_)), "{:?}", report.error);
    assert_eq!(session.mocks.debugger.prepared_modules(), vec![MODULE]);
}
