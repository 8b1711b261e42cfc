use std::time::Duration;

use nova_enc::{
    ApplyUpdatesOutcome, ConsistencyError, EncError, FaultReport, ModuleUpdateStatus,
    SessionState,
};
use nova_test_utils::{edit, AnalysisScript};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use super::support::{a_cs, eventually, TestSession, PROJECT};

fn next_fault(faults: &mut nova_enc::FaultReceiver) -> FaultReport {
    faults.try_recv().expect("a fault should have been reported")
}

#[tokio::test]
async fn at_most_one_update_is_pending() {
    let session = TestSession::start(false);
    let mut faults = session.service.subscribe_faults();
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));

    let results = session.emit(&edited).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::Ready);
    assert_eq!(
        session.service.session_state(session.id).unwrap(),
        SessionState::PendingUpdate
    );

    let err = session.emit(&edited).await.unwrap_err();
    assert_eq!(err, EncError::Consistency(ConsistencyError::PendingUpdateExists));
    let fault = next_fault(&mut faults);
    assert_eq!(fault.operation, "emit_solution_update");
    assert_eq!(fault.error, err);

    session.service.discard_solution_update(session.id).await.unwrap();
    assert_eq!(
        session.service.session_state(session.id).unwrap(),
        SessionState::Running
    );

    let err = session.service.discard_solution_update(session.id).await.unwrap_err();
    assert_eq!(err, EncError::Consistency(ConsistencyError::NoPendingUpdate));
    assert_eq!(next_fault(&mut faults).operation, "discard_solution_update");

    let err = session.service.commit_solution_update(session.id).await.unwrap_err();
    assert_eq!(err, EncError::Consistency(ConsistencyError::NoPendingUpdate));
    let fault = next_fault(&mut faults);
    assert_eq!(fault.operation, "commit_solution_update");
    assert!(fault.sequence > 1);

    // The session survives protocol misuse.
    let results = session.emit(&edited).await.unwrap();
    assert_eq!(results.status, ModuleUpdateStatus::Ready);
}

#[tokio::test]
async fn rejected_update_is_discarded() {
    let session = TestSession::start(false);
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    session
        .mocks
        .debugger
        .set_apply_outcome(ApplyUpdatesOutcome::Rejected("schema change".into()));
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));

    session.emit(&edited).await.unwrap();
    let outcome = session
        .service
        .apply_pending_update(session.id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ApplyUpdatesOutcome::Rejected("schema change".into()));
    assert_eq!(session.mocks.debugger.applied_updates().len(), 1);
    assert_eq!(
        session.service.session_state(session.id).unwrap(),
        SessionState::Running
    );

    let debugging = session.service.session(session.id).unwrap();
    let committed = debugging.committed_solution();
    assert_eq!(committed.document(session.doc_a()).unwrap().text(), a_cs(0));
    assert!(debugging.non_remappable_regions().is_empty());

    // Baselines were left alone and the analysis is reused.
    session.emit(&edited).await.unwrap();
    assert_eq!(session.mocks.emitter.calls(), vec![(PROJECT, 0), (PROJECT, 0)]);
    assert_eq!(session.mocks.analyzer.analysis_count(), 1);
}

#[tokio::test]
async fn applied_update_is_committed() {
    let session = TestSession::start(false);
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));

    session.emit(&edited).await.unwrap();
    let outcome = session
        .service
        .apply_pending_update(session.id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ApplyUpdatesOutcome::Applied);

    let debugging = session.service.session(session.id).unwrap();
    assert_eq!(debugging.state(), SessionState::Running);
    assert_eq!(
        debugging
            .committed_solution()
            .document(session.doc_a())
            .unwrap()
            .text(),
        a_cs(1)
    );
    let baseline = debugging.baselines().baseline(PROJECT).unwrap();
    assert_eq!(baseline.emit.generation, 1);
    assert_eq!(baseline.emit.readers.len(), 2);

    // Nothing left to apply.
    let err = session
        .service
        .apply_pending_update(session.id, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, EncError::Consistency(ConsistencyError::NoPendingUpdate));
}

#[tokio::test]
async fn emit_failures_stage_nothing() {
    let session = TestSession::start(false);
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    session.mocks.emitter.fail_with("metadata writer crashed");
    let edited = edit(&session.fixture.solution(), "a.cs", &a_cs(1));

    let err = session.emit(&edited).await.unwrap_err();
    assert_eq!(err, EncError::Emit("metadata writer crashed".into()));
    assert!(!err.is_fatal());
    assert_eq!(
        session.service.session_state(session.id).unwrap(),
        SessionState::Running
    );
}

#[tokio::test]
async fn transitions_wait_for_the_runtime_to_answer() {
    let session = TestSession::start(false);
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    let base = session.fixture.solution();
    let first = edit(&base, "a.cs", &a_cs(1));
    let second = edit(&base, "a.cs", &a_cs(7));
    session.emit(&first).await.unwrap();
    session.mocks.debugger.hold_applies();

    let apply = session
        .service
        .apply_pending_update(session.id, CancellationToken::new());
    let contenders = async {
        eventually(|| session.mocks.debugger.applied_updates().len() == 1).await;
        tokio::join!(
            session.service.discard_solution_update(session.id),
            session.emit(&second),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                session.mocks.debugger.release_applies();
            }
        )
    };
    let (outcome, (discarded, emitted, ())) = tokio::join!(apply, contenders);

    assert_eq!(outcome.unwrap(), ApplyUpdatesOutcome::Applied);
    assert_eq!(
        discarded.unwrap_err(),
        EncError::Consistency(ConsistencyError::NoPendingUpdate)
    );
    assert_eq!(emitted.unwrap().status, ModuleUpdateStatus::Ready);

    // The update the runtime applied is the one committed; the later emit
    // is staged on top of it.
    let debugging = session.service.session(session.id).unwrap();
    assert_eq!(
        debugging
            .committed_solution()
            .document(session.doc_a())
            .unwrap()
            .text(),
        a_cs(1)
    );
    assert_eq!(debugging.state(), SessionState::PendingUpdate);
    assert_eq!(session.mocks.emitter.calls(), vec![(PROJECT, 0), (PROJECT, 1)]);
}

#[tokio::test]
async fn ending_the_session_waits_for_a_running_apply() {
    let session = TestSession::start(false);
    session
        .mocks
        .analyzer
        .script(session.doc_a(), AnalysisScript::body_update("C.F"));
    session
        .emit(&edit(&session.fixture.solution(), "a.cs", &a_cs(1)))
        .await
        .unwrap();
    session.mocks.debugger.hold_applies();
    let debugging = session.service.session(session.id).unwrap();

    let apply = debugging.apply_pending_update(CancellationToken::new());
    let end = async {
        eventually(|| session.mocks.debugger.applied_updates().len() == 1).await;
        let ended = tokio::join!(debugging.end_session(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.mocks.debugger.release_applies();
        });
        ended.0
    };
    let (outcome, ended) = tokio::join!(apply, end);

    // The runtime answered before the session ended, so the update commits
    // and the end waits for it.
    assert_eq!(outcome.unwrap(), ApplyUpdatesOutcome::Applied);
    ended.unwrap();
    assert_eq!(
        debugging
            .committed_solution()
            .document(session.doc_a())
            .unwrap()
            .text(),
        a_cs(1)
    );
}
