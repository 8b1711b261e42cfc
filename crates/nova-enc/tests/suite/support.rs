use std::time::Duration;

use nova_enc::{
    ActiveStatementDebugInfo, ActiveStatementFlags, ActiveStatementId, ActiveStatementSpan,
    DebuggingSessionId, DocumentId, EditAndContinueService, EmitSolutionUpdateResults, EncConfig,
    EncResult, LinePositionSpan, ModuleId, ProjectId, Solution,
};
use nova_test_utils::{leaf_up_to_date, method, Fixture, MockServices};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

pub(crate) const MODULE: ModuleId = ModuleId(0xA11CE);
pub(crate) const PROJECT: ProjectId = ProjectId(1);
pub(crate) const METHOD_TOKEN: u32 = 0x0600_0005;

pub(crate) const SOURCE: &str = "//- /a.cs
class C
{
    void F() {
        <AS:0>G();</AS:0>
    }
}
//- /b.cs
class D
{
    // helper
}
";

/// `a.cs` with `inserted` comment lines pushing the call to `G` down.
pub(crate) fn a_cs(inserted: usize) -> String {
    let mut text = String::from("class C\n{\n    void F() {\n");
    for idx in 0..inserted {
        text.push_str(&format!("        // note {idx}\n"));
    }
    text.push_str("        G();\n    }\n}\n");
    text
}

/// Span of the `G();` call on `line`.
pub(crate) fn statement_line(line: i32) -> LinePositionSpan {
    LinePositionSpan::from_coords(line, 8, line, 12)
}

pub(crate) fn span_at(line: i32, flags: ActiveStatementFlags) -> ActiveStatementSpan {
    ActiveStatementSpan::new(ActiveStatementId(0), statement_line(line), flags)
}

pub(crate) struct TestSession {
    pub(crate) mocks: MockServices,
    pub(crate) fixture: Fixture,
    pub(crate) service: EditAndContinueService,
    pub(crate) id: DebuggingSessionId,
}

impl TestSession {
    /// Session over [`SOURCE`] built into [`MODULE`], with one thread stopped
    /// in version 1 of `C.F` at the call to `G`.
    pub(crate) fn start(in_break_state: bool) -> Self {
        let fixture = Fixture::parse(PROJECT, "app", SOURCE);
        let solution = fixture.solution();
        Self::start_with(fixture, solution, in_break_state)
    }

    pub(crate) fn start_with(fixture: Fixture, solution: Solution, in_break_state: bool) -> Self {
        let mocks = MockServices::default();
        mocks.baselines.build(&fixture.project, MODULE);
        mocks
            .debugger
            .set_active_statements(vec![Self::up_to_date_record(&fixture)]);
        let service =
            EditAndContinueService::new(mocks.services(), EncConfig::default(), Handle::current())
                .with_span_provider(mocks.spans.clone());
        let id = service.start_debugging_session(solution, in_break_state);
        Self {
            mocks,
            fixture,
            service,
            id,
        }
    }

    fn up_to_date_record(fixture: &Fixture) -> ActiveStatementDebugInfo {
        fixture.record(0, method(MODULE, METHOD_TOKEN, 1), 10, leaf_up_to_date())
    }

    /// The thread still executes version 1 after later versions were applied.
    pub(crate) fn report_stale_thread(&self) {
        self.mocks.debugger.set_active_statements(vec![self.fixture.record(
            0,
            method(MODULE, METHOD_TOKEN, 1),
            10,
            ActiveStatementFlags::LEAF_FRAME,
        )]);
    }

    pub(crate) fn doc_a(&self) -> DocumentId {
        self.fixture.document("a.cs").id()
    }

    pub(crate) fn doc_b(&self) -> DocumentId {
        self.fixture.document("b.cs").id()
    }

    pub(crate) async fn emit(&self, solution: &Solution) -> EncResult<EmitSolutionUpdateResults> {
        self.service
            .emit_solution_update(self.id, solution, CancellationToken::new())
            .await
    }

    /// Base active statement spans of `a.cs`.
    pub(crate) async fn base_spans(&self) -> Vec<ActiveStatementSpan> {
        let mut spans = self
            .service
            .get_base_active_statement_spans(self.id, &[self.doc_a()], CancellationToken::new())
            .await
            .unwrap();
        spans.remove(0)
    }
}

pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition was not reached in time");
}
