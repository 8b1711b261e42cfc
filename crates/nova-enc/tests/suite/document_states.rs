use std::sync::Arc;
use std::time::Duration;

use nova_enc::{
    BaselineError, DiagnosticSeverity, LinePositionSpan, ModuleUpdateStatus, RudeEditDiagnostic,
    RudeEditKind, SessionState,
};
use nova_test_utils::{edit, AnalysisScript, Fixture};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use super::support::{a_cs, eventually, statement_line, TestSession, PROJECT, SOURCE};

#[tokio::test]
async fn out_of_sync_document_is_skipped_with_warning() {
    let fixture = Fixture::parse(PROJECT, "app", SOURCE);
    // Edited after the build, before the session started.
    let started = edit(&fixture.solution(), "a.cs", &a_cs(1));
    let session = TestSession::start_with(fixture, started.clone(), false);
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));

    let edited = edit(&started, "a.cs", &a_cs(2));
    let results = session.emit(&edited).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::None);
    assert_eq!(results.diagnostics.len(), 1);
    let warning = &results.diagnostics[0];
    assert_eq!(warning.code, "ENC1005");
    assert_eq!(warning.severity, DiagnosticSeverity::Warning);
    assert_eq!(warning.document, Some(session.doc_a()));
    assert_eq!(session.mocks.analyzer.analysis_count(), 0);

    let current = edited.document(session.doc_a()).unwrap();
    let diagnostics = session
        .service
        .get_document_diagnostics(session.id, current, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(diagnostics, vec![warning.clone()]);

    // Reverting the file to what was built brings it back in sync.
    let reverted = session.fixture.document("a.cs");
    assert!(session
        .service
        .on_source_file_updated(session.id, &reverted)
        .unwrap());
    let results = session.emit(&edited).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::Ready);
    assert!(results.diagnostics.is_empty());
}

#[tokio::test]
async fn unreadable_baseline_blocks_until_the_module_can_be_read() {
    let session = TestSession::start(false);
    session
        .mocks
        .baselines
        .fail(PROJECT, BaselineError::Locked("app.dll".into()));
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));
    let current = Arc::clone(edited.document(session.doc_a()).unwrap());

    // Read errors are not reported while typing.
    let diagnostics = session
        .service
        .get_document_diagnostics(session.id, &current, CancellationToken::new())
        .await
        .unwrap();
    assert!(diagnostics.is_empty());

    let results = session.emit(&edited).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::Blocked);
    assert_eq!(results.diagnostics.len(), 1);
    assert_eq!(results.diagnostics[0].code, "ENC1001");
    assert!(results.diagnostics[0].message.contains("app.dll"));
    assert_eq!(
        session.service.session_state(session.id).unwrap(),
        SessionState::Running
    );

    session.mocks.baselines.heal(PROJECT);
    let results = session.emit(&edited).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::Ready);
    assert_eq!(session.mocks.baselines.open_count(), 3);
}

#[tokio::test]
async fn rude_edits_block_emission() {
    let session = TestSession::start(true);
    let rude = RudeEditDiagnostic::new(
        RudeEditKind::UpdateAroundActiveStatement,
        LinePositionSpan::from_coords(3, 8, 3, 12),
    )
    .with_argument("lock");
    session.mocks.analyzer.script(
        session.doc_a(),
        AnalysisScript::body_update("C.F").with_rude_edit(rude.clone()),
    );
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));

    let results = session.emit(&edited).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::Blocked);
    assert!(results.module_updates.is_empty());
    assert_eq!(results.diagnostics, vec![rude.to_diagnostic(session.doc_a())]);
    assert!(results.diagnostics[0].message.contains("'lock'"));

    let current = edited.document(session.doc_a()).unwrap();
    let diagnostics = session
        .service
        .get_document_diagnostics(session.id, current, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(diagnostics, results.diagnostics);
    // Both requests shared one analysis.
    assert_eq!(session.mocks.analyzer.analysis_count(), 1);
    assert!(session.service.commit_solution_update(session.id).await.is_err());
}

#[tokio::test]
async fn compilation_errors_withhold_the_update() {
    let session = TestSession::start(true);
    session.mocks.analyzer.script(
        session.doc_a(),
        AnalysisScript::body_update("C.F")
            .with_line_update(3, 4)
            .with_compilation_errors(),
    );
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));

    let results = session.emit(&edited).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::Blocked);
    assert!(session.mocks.emitter.calls().is_empty());

    assert!(results.module_updates.is_empty());
    assert!(results.diagnostics.is_empty());
    assert_eq!(
        session.service.session_state(session.id).unwrap(),
        SessionState::Break
    );
    assert!(session.service.commit_solution_update(session.id).await.is_err());
}

#[tokio::test]
async fn adjusted_spans_follow_the_current_document() {
    let session = TestSession::start(true);
    session.mocks.analyzer.script(
        session.doc_a(),
        AnalysisScript::body_update("C.F").with_line_update(3, 5),
    );
    let unchanged = session.fixture.document("a.cs");
    let spans = session
        .service
        .get_adjusted_active_statement_spans(session.id, &unchanged, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(spans, session.base_spans().await);

    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(2));
    let spans = session
        .service
        .get_adjusted_active_statement_spans(
            session.id,
            edited.document(session.doc_a()).unwrap(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].line_span, statement_line(5));
}

#[tokio::test]
async fn diagnostics_survive_a_break_state_change() {
    let session = TestSession::start(false);
    let rude = RudeEditDiagnostic::new(
        RudeEditKind::UpdateAroundActiveStatement,
        LinePositionSpan::from_coords(3, 8, 3, 12),
    );
    session.mocks.analyzer.script(
        session.doc_a(),
        AnalysisScript::body_update("C.F").with_rude_edit(rude.clone()),
    );
    session.mocks.analyzer.set_delay(Duration::from_millis(50));
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));
    let current = edited.document(session.doc_a()).unwrap();

    let (diagnostics, ()) = tokio::join!(
        session
            .service
            .get_document_diagnostics(session.id, current, CancellationToken::new()),
        async {
            eventually(|| session.mocks.analyzer.analysis_count() == 1).await;
            session.service.break_state_changed(session.id, true).unwrap();
        }
    );

    assert_eq!(diagnostics.unwrap(), vec![rude.to_diagnostic(session.doc_a())]);
    assert_eq!(
        session.service.session_state(session.id).unwrap(),
        SessionState::Break
    );
}

#[tokio::test]
async fn ending_the_session_cancels_running_analyses() {
    let session = TestSession::start(false);
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    session.mocks.analyzer.set_delay(Duration::from_secs(30));
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));
    let current = edited.document(session.doc_a()).unwrap();

    let (diagnostics, ()) = tokio::join!(
        session
            .service
            .get_document_diagnostics(session.id, current, CancellationToken::new()),
        async {
            eventually(|| session.mocks.analyzer.analysis_count() == 1).await;
            session.service.end_debugging_session(session.id).await.unwrap();
        }
    );

    assert!(diagnostics.is_err());
}
