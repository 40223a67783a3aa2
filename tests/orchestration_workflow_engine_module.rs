use caseflow::bootstrap::default_registry;
use caseflow::case::{ArtifactSlot, CaseState, ExecutionOutcome, Phase, StateUpdate};
use caseflow::orchestration::{
    ApprovalDecision, Decision, EngineError, ExecutionLimits, InMemoryMetrics, MemoryAuditTrail,
    RejectionPolicy, ResumeRejection, RunOutcome, Step, StepContext, StepError, StepOutcome,
    StepOutput, StepRegistry, WorkflowEngine,
};
use caseflow::shared::{now_secs, CaseHandle, CaseId, EventLog, TenantId};
use caseflow::steps::auditor::{DataCollectorStep, PlannerStep};
use caseflow::steps::{AgentReply, ScriptedBackend};
use caseflow::store::{
    HandleLookup, HandleStatus, MemorySuspensionStore, StoreError, SuspensionStore,
};
use caseflow::workflows::{
    all_workflows, AUDITEE_MONITORING_WORKFLOW, AUDITEE_RESPONSE_WORKFLOW, AUDITOR_WORKFLOW,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

struct Harness {
    engine: WorkflowEngine,
    backend: Arc<ScriptedBackend>,
    audit: Arc<MemoryAuditTrail>,
    metrics: Arc<InMemoryMetrics>,
}

fn harness(backend: ScriptedBackend) -> Harness {
    harness_with(backend, |_| {}, RejectionPolicy::Fail, ExecutionLimits::default())
}

fn harness_with(
    backend: ScriptedBackend,
    customize: impl FnOnce(&mut StepRegistry),
    on_reject: RejectionPolicy,
    limits: ExecutionLimits,
) -> Harness {
    let backend = Arc::new(backend);
    let mut registry = default_registry(backend.clone(), EventLog::disabled());
    customize(&mut registry);
    let audit = Arc::new(MemoryAuditTrail::new());
    let metrics = Arc::new(InMemoryMetrics::new());

    let mut builder = WorkflowEngine::builder(
        Arc::new(registry),
        Arc::new(MemorySuspensionStore::new()),
    )
    .audit_trail(audit.clone())
    .metrics(metrics.clone())
    .on_reject(on_reject)
    .limits(limits);
    for definition in all_workflows().expect("workflows") {
        builder = builder.workflow(definition);
    }

    Harness {
        engine: builder.build().expect("engine"),
        backend,
        audit,
        metrics,
    }
}

fn auditor_backend(planner_confidence: f64, pending_questions: serde_json::Value) -> ScriptedBackend {
    ScriptedBackend::new()
        .reply(
            "auditor_planner",
            AgentReply::new(json!({
                "risk_assessment": {"high_risk_areas": ["revenue"]},
                "audit_plan": {"scope": "revenue", "methodology": "sampling"}
            }))
            .with_confidence(planner_confidence),
        )
        .reply(
            "auditor_data_collector",
            AgentReply::new(json!({"collected_data": [{"ledger": "gl"}], "record_count": 120})),
        )
        .reply(
            "auditor_controls_tester",
            AgentReply::new(json!({"test_results": [{"control": "c-01", "passed": true}]}))
                .with_confidence(0.85),
        )
        .reply(
            "auditor_anomaly_detective",
            AgentReply::new(json!({
                "anomalies": [{"kind": "duplicate_payment"}],
                "findings": [{"id": "f-1", "severity": "high"}],
                "pending_questions": pending_questions
            }))
            .with_confidence(0.8),
        )
        .reply(
            "auditor_knowledge",
            AgentReply::new(json!({"answers": [{"question": "q-1", "answer": "policy 4.2"}]}))
                .with_confidence(0.8),
        )
        .reply(
            "auditor_report_writer",
            AgentReply::new(json!({"report": {"title": "Revenue audit"}})).with_confidence(0.9),
        )
        .reply(
            "auditor_follow_up",
            AgentReply::new(json!({"actions": [{"finding": "f-1", "owner": "ap-team"}]}))
                .with_confidence(0.9),
        )
}

fn auditor_case(case: &str) -> CaseState {
    CaseState::auditor(
        TenantId::parse("acme").expect("tenant"),
        CaseId::parse(case).expect("case"),
    )
}

fn auditee_case(case: &str) -> CaseState {
    CaseState::auditee(
        TenantId::parse("acme").expect("tenant"),
        CaseId::parse(case).expect("case"),
    )
}

fn nodes(state: &CaseState) -> Vec<&str> {
    state
        .executions()
        .iter()
        .map(|record| record.node.as_str())
        .collect()
}

fn expect_suspended(outcome: RunOutcome) -> (CaseHandle, String, CaseState) {
    match outcome {
        RunOutcome::Suspended(suspension) => {
            (suspension.handle, suspension.gate, suspension.state)
        }
        other => panic!("expected suspension, got {other:?}"),
    }
}

fn expect_failed(outcome: RunOutcome) -> (EngineError, Option<CaseState>) {
    match outcome {
        RunOutcome::Failed(failure) => (failure.error, failure.state),
        other => panic!("expected failure, got {other:?}"),
    }
}

/// Records whether approval was still pending when it ran.
struct ApprovalWitness {
    seen: Mutex<Vec<bool>>,
}

impl Step for ApprovalWitness {
    fn name(&self) -> &str {
        DataCollectorStep::NAME
    }

    fn description(&self) -> &str {
        "records the approval flag"
    }

    fn execute(&self, state: &CaseState, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        self.seen
            .lock()
            .expect("witness lock")
            .push(state.requires_approval());
        Ok(StepOutput::new(
            StateUpdate::new().with_phase(Phase::Fieldwork),
            0.9,
            Decision::new("observed", ""),
        ))
    }
}

#[test]
fn confident_plan_advances_to_fieldwork_without_suspending_at_plan_gate() {
    let h = harness(auditor_backend(0.9, json!([])));
    let (_, gate, state) = expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-a")));

    assert_eq!(gate, "report_approval");
    assert_eq!(
        nodes(&state),
        vec![
            "orchestrator",
            "planner",
            "data_collector",
            "controls_tester",
            "anomaly_detective",
            "report_writer",
        ]
    );
    let executions = state.executions();
    assert_eq!(executions[0].phase_after, Phase::Planning);
    assert_eq!(executions[1].confidence, Some(0.9));
    assert!(!executions[1].escalated);
    assert_eq!(executions[2].phase_after, Phase::Fieldwork);
    assert!(state.has_artifact(ArtifactSlot::AuditPlan));
    assert_eq!(h.metrics.executions("auditor_planner", StepOutcome::Success), 1);
}

#[test]
fn low_confidence_plan_suspends_and_approval_clears_the_flag() {
    let witness = Arc::new(ApprovalWitness {
        seen: Mutex::new(Vec::new()),
    });
    let registered = witness.clone();
    let h = harness_with(
        auditor_backend(0.4, json!([])),
        move |registry| registry.register(registered),
        RejectionPolicy::Fail,
        ExecutionLimits::default(),
    );

    let (handle, gate, state) =
        expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-b")));
    assert_eq!(gate, "plan_approval");
    assert!(state.requires_approval());
    assert_eq!(state.approval_context()["type"], json!("audit_plan"));
    assert_eq!(state.phase(), Phase::Planning);
    assert!(state.executions()[1].escalated);

    let records = h.audit.records();
    let planner = records
        .iter()
        .find(|record| record.step_name == PlannerStep::NAME)
        .expect("planner decision");
    assert!(planner.escalated);
    assert_eq!(planner.resource_type.as_deref(), Some("audit_plan"));

    let (_, gate, state) =
        expect_suspended(h.engine.resume(&handle, ApprovalDecision::approve()));
    assert_eq!(witness.seen.lock().expect("witness").as_slice(), &[false]);
    assert_eq!(gate, "report_approval");
    let approved = state
        .executions()
        .iter()
        .find(|record| record.node == "plan_approval")
        .expect("gate record");
    assert_eq!(approved.outcome, ExecutionOutcome::Approved);
    assert_eq!(state.approval_context()["type"], json!("report"));
}

#[test]
fn evidence_request_routes_to_evidence_search_in_searching_phase() {
    let backend = ScriptedBackend::new().reply(
        "auditee_evidence_search",
        AgentReply::new(json!({"results": [{"doc": "inv-1"}, {"doc": "inv-2"}, {"doc": "inv-3"}, {"doc": "inv-4"}, {"doc": "inv-5"}]})),
    );
    let h = harness(backend);
    let state = auditee_case("dialogue-c").with_artifact(
        ArtifactSlot::IncomingQuestions,
        json!([{"category": "evidence_request", "content": "Q3 invoices"}]),
    );

    let outcome = h.engine.start(AUDITEE_RESPONSE_WORKFLOW, state);
    let RunOutcome::Completed(state) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(nodes(&state), vec!["orchestrator", "evidence_search"]);
    assert_eq!(state.executions()[0].phase_after, Phase::Searching);
    assert_eq!(state.executions()[1].phase_after, Phase::Searching);
    assert_eq!(state.phase(), Phase::Completed);
    assert_eq!(
        state.artifacts().items(ArtifactSlot::EvidenceSearchResults).len(),
        5
    );
    assert_eq!(h.backend.calls(), vec!["auditee_evidence_search".to_string()]);
}

#[test]
fn empty_pending_questions_skip_knowledge_and_report_needs_approval() {
    let h = harness(auditor_backend(0.9, json!([])));
    let (_, gate, state) =
        expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-d")));

    assert!(!nodes(&state).contains(&"knowledge"));
    let position = nodes(&state)
        .iter()
        .position(|node| *node == "anomaly_detective")
        .expect("anomaly detective ran");
    assert_eq!(nodes(&state)[position + 1], "report_writer");
    assert_eq!(gate, "report_approval");
    assert!(state.requires_approval());
    assert_eq!(state.approval_context()["type"], json!("report"));
    assert_eq!(state.phase(), Phase::Reporting);
}

#[test]
fn pending_questions_route_through_knowledge() {
    let h = harness(auditor_backend(0.9, json!(["why was invoice 7 paid twice?"])));
    let (_, _, state) = expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-k")));

    let order = nodes(&state);
    let knowledge = order
        .iter()
        .position(|node| *node == "knowledge")
        .expect("knowledge ran");
    assert_eq!(order[knowledge - 1], "anomaly_detective");
    assert_eq!(order[knowledge + 1], "report_writer");
    assert!(!state.has_artifact(ArtifactSlot::PendingQuestions));
    assert_eq!(state.artifacts().items(ArtifactSlot::DialogueHistory).len(), 1);
}

#[test]
fn approving_the_report_completes_and_second_resume_is_rejected() {
    let h = harness(auditor_backend(0.9, json!([])));
    let (handle, _, _) = expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-e")));

    let outcome = h.engine.resume(&handle, ApprovalDecision::approve());
    let RunOutcome::Completed(state) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(state.phase(), Phase::Completed);
    assert!(!state.requires_approval());
    assert_eq!(nodes(&state).last(), Some(&"follow_up"));
    assert!(state.metadata().contains_key("follow_up"));

    let (err, state) = expect_failed(h.engine.resume(&handle, ApprovalDecision::approve()));
    assert!(state.is_none());
    assert!(matches!(
        err,
        EngineError::Resume {
            reason: ResumeRejection::AlreadyResumed,
            ..
        }
    ));
}

#[test]
fn rejected_approval_fails_or_cancels_per_policy() {
    let h = harness(auditor_backend(0.9, json!([])));
    let (handle, _, _) = expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-r")));
    let (err, state) = expect_failed(
        h.engine
            .resume(&handle, ApprovalDecision::reject("numbers do not tie out")),
    );
    let state = state.expect("state");
    assert!(matches!(err, EngineError::ApprovalRejected { ref gate, .. } if gate == "report_approval"));
    assert_eq!(state.phase(), Phase::Failed);
    assert!(state.errors()[0].contains("numbers do not tie out"));
    assert_eq!(
        state.executions().last().map(|record| record.outcome),
        Some(ExecutionOutcome::Rejected)
    );

    let h = harness_with(
        auditor_backend(0.9, json!([])),
        |_| {},
        RejectionPolicy::Cancel,
        ExecutionLimits::default(),
    );
    let (handle, _, _) = expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-s")));
    let (_, state) = expect_failed(h.engine.resume(&handle, ApprovalDecision::reject("scope")));
    assert_eq!(state.expect("state").phase(), Phase::Cancelled);
}

#[test]
fn cancelled_handle_cannot_be_resumed() {
    let h = harness(auditor_backend(0.4, json!([])));
    let (handle, _, _) = expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-x")));

    let state = h.engine.cancel(&handle).expect("cancel");
    assert_eq!(state.phase(), Phase::Cancelled);
    assert!(state.errors()[0].contains("plan_approval"));

    let (err, _) = expect_failed(h.engine.resume(&handle, ApprovalDecision::approve()));
    assert!(matches!(
        err,
        EngineError::Resume {
            reason: ResumeRejection::Cancelled,
            ..
        }
    ));
    assert!(h.engine.cancel(&handle).is_err());
}

#[test]
fn unknown_handle_is_a_resume_error() {
    let h = harness(ScriptedBackend::new());
    let handle = CaseHandle::parse("hdl-missing").expect("handle");
    let (err, _) = expect_failed(h.engine.resume(&handle, ApprovalDecision::approve()));
    assert!(matches!(
        err,
        EngineError::Resume {
            reason: ResumeRejection::UnknownHandle,
            ..
        }
    ));
}

#[test]
fn step_failure_fails_the_case_without_retry() {
    let backend = ScriptedBackend::new()
        .reply(
            "auditor_planner",
            AgentReply::new(json!({"audit_plan": {"scope": "revenue"}})).with_confidence(0.9),
        )
        .fail("auditor_data_collector", "erp timeout");
    let h = harness(backend);

    let (err, state) = expect_failed(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-f")));
    let state = state.expect("state");
    assert!(matches!(
        err,
        EngineError::StepExecution {
            ref step,
            source: StepError::Backend { .. },
        } if step == "auditor_data_collector"
    ));
    assert_eq!(state.phase(), Phase::Failed);
    assert_eq!(state.errors().len(), 1);
    assert_eq!(
        state.executions().last().map(|record| record.outcome),
        Some(ExecutionOutcome::Failed)
    );
    assert_eq!(
        h.metrics
            .executions("auditor_data_collector", StepOutcome::Failure),
        1
    );
    assert_eq!(
        h.backend
            .calls()
            .iter()
            .filter(|step| *step == "auditor_data_collector")
            .count(),
        1
    );
}

#[test]
fn planner_that_never_produces_a_plan_hits_the_step_limit() {
    let backend = ScriptedBackend::new().reply(
        "auditor_planner",
        AgentReply::new(json!({"risk_assessment": {}})).with_confidence(0.9),
    );
    let h = harness_with(
        backend,
        |_| {},
        RejectionPolicy::Fail,
        ExecutionLimits {
            max_steps_per_run: 5,
        },
    );

    let (err, state) = expect_failed(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-loop")));
    assert!(matches!(
        err,
        EngineError::StepLimitExceeded {
            max_steps_per_run: 5
        }
    ));
    let state = state.expect("state");
    assert_eq!(state.executions().len(), 5);
    assert_eq!(
        nodes(&state),
        vec!["orchestrator", "planner", "orchestrator", "planner", "orchestrator"]
    );
    assert_eq!(state.phase(), Phase::Failed);
}

/// Claims the case is already complete, which no step may do.
struct PrematureCompletion;

impl Step for PrematureCompletion {
    fn name(&self) -> &str {
        "auditor_orchestrator"
    }

    fn description(&self) -> &str {
        "jumps straight to completion"
    }

    fn execute(&self, _state: &CaseState, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        Ok(StepOutput::new(
            StateUpdate::new()
                .with_phase(Phase::Completed)
                .with_artifact(ArtifactSlot::Report, json!({"title": "too early"})),
            1.0,
            Decision::new("skipped", ""),
        ))
    }
}

#[test]
fn invalid_phase_transition_fails_the_case_and_discards_the_update() {
    let h = harness_with(
        ScriptedBackend::new(),
        |registry| registry.register(Arc::new(PrematureCompletion)),
        RejectionPolicy::Fail,
        ExecutionLimits::default(),
    );

    let (err, state) = expect_failed(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-m")));
    assert!(matches!(err, EngineError::Merge { ref step, .. } if step == "auditor_orchestrator"));
    let state = state.expect("state");
    assert!(!state.has_artifact(ArtifactSlot::Report));
    assert_eq!(state.phase(), Phase::Failed);
}

#[test]
fn unknown_workflow_and_closed_cases_are_rejected_up_front() {
    let backend = ScriptedBackend::new()
        .reply(
            "auditee_controls_monitor",
            AgentReply::new(json!({"controls_status": {"score": 92}, "issues": []})),
        )
        .reply(
            "auditee_risk_alert",
            AgentReply::new(json!({"risk_alerts": []})),
        );
    let h = harness(backend);

    let (err, state) = expect_failed(h.engine.start("payroll", auditee_case("mon-1")));
    assert!(matches!(err, EngineError::UnknownWorkflow { ref workflow_id } if workflow_id == "payroll"));
    assert_eq!(state.expect("state returned").phase(), Phase::Idle);

    let outcome = h.engine.start(AUDITEE_MONITORING_WORKFLOW, auditee_case("mon-1"));
    let RunOutcome::Completed(done) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(nodes(&done), vec!["controls_monitor", "risk_alert"]);
    assert_eq!(done.artifact(ArtifactSlot::ControlsStatus), Some(&json!({"score": 92})));

    let (err, _) = expect_failed(h.engine.start(AUDITEE_MONITORING_WORKFLOW, done));
    assert!(matches!(
        err,
        EngineError::CaseClosed {
            phase: Phase::Completed,
            ..
        }
    ));
    assert_eq!(h.backend.calls().len(), 2);
}

#[test]
fn pending_approvals_list_suspended_cases_until_resumed() {
    let h = harness(auditor_backend(0.4, json!([])));
    let (handle, _, _) = expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-p")));

    let pending = h.engine.pending_approvals().expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].handle, handle);
    assert_eq!(pending[0].gate, "plan_approval");
    assert_eq!(pending[0].workflow_id, AUDITOR_WORKFLOW);
    assert_eq!(pending[0].case_id.as_str(), "audit-p");
    assert_eq!(pending[0].approval_context["type"], json!("audit_plan"));

    let (next, _, state) = expect_suspended(h.engine.resume(
        &handle,
        ApprovalDecision::Approve {
            note: Some("scope confirmed".to_string()),
        },
    ));
    assert_eq!(state.metadata()["approval_note"], json!("scope confirmed"));
    let pending = h.engine.pending_approvals().expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].handle, next);
    assert_eq!(pending[0].gate, "report_approval");
}

#[test]
fn every_executed_step_leaves_one_decision_record() {
    let h = harness(auditor_backend(0.9, json!(["q"])));
    let (_, _, state) = expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-t")));

    let records = h.audit.records();
    assert_eq!(records.len(), state.executions().len());
    assert!(records
        .iter()
        .all(|record| record.case_id.as_str() == "audit-t" && record.tenant_id.as_str() == "acme"));
    assert_eq!(records[0].step_name, "auditor_orchestrator");
    assert_eq!(records[0].confidence, 1.0);
    assert_eq!(
        records.last().map(|record| record.decision.as_str()),
        Some("report_generated")
    );
}

#[test]
fn engine_refuses_workflows_naming_unregistered_steps() {
    let registry = StepRegistry::new().with(PrematureCompletion);
    let err = WorkflowEngine::builder(Arc::new(registry), Arc::new(MemorySuspensionStore::new()))
        .workflow(caseflow::workflows::auditor_workflow().expect("workflow"))
        .build()
        .err()
        .expect("missing steps");
    assert!(matches!(err, EngineError::UnknownStep { ref name } if name == "auditor_anomaly_detective"));
}

fn gated_engine(store: Arc<dyn SuspensionStore>, approval_ttl_secs: Option<u64>) -> WorkflowEngine {
    let registry = default_registry(
        Arc::new(auditor_backend(0.4, json!([]))),
        EventLog::disabled(),
    );
    let mut builder = WorkflowEngine::builder(Arc::new(registry), store);
    if let Some(ttl) = approval_ttl_secs {
        builder = builder.approval_ttl_secs(ttl);
    }
    for definition in all_workflows().expect("workflows") {
        builder = builder.workflow(definition);
    }
    builder.build().expect("engine")
}

#[test]
fn starting_a_case_waiting_at_a_gate_is_rejected_as_busy() {
    let h = harness(auditor_backend(0.4, json!([])));
    let (handle, gate, _) =
        expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-dup")));
    assert_eq!(gate, "plan_approval");

    let (err, state) = expect_failed(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-dup")));
    assert!(matches!(err, EngineError::CaseBusy { ref case_id } if case_id.as_str() == "audit-dup"));
    assert!(state.expect("state returned").executions().is_empty());
    let pending = h.engine.pending_approvals().expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].handle, handle);

    h.engine.cancel(&handle).expect("cancel");
    let (_, gate, _) =
        expect_suspended(h.engine.start(AUDITOR_WORKFLOW, auditor_case("audit-dup")));
    assert_eq!(gate, "plan_approval");
}

#[test]
fn resume_after_the_approval_window_expires_the_case() {
    let store = Arc::new(MemorySuspensionStore::new());
    let engine = gated_engine(store.clone(), Some(0));

    let suspension = match engine.start(AUDITOR_WORKFLOW, auditor_case("audit-late")) {
        RunOutcome::Suspended(suspension) => suspension,
        other => panic!("expected suspension, got {other:?}"),
    };
    assert!(suspension.expires_at.is_some());
    let handle = suspension.handle;

    let (err, state) = expect_failed(engine.resume(&handle, ApprovalDecision::approve()));
    assert!(matches!(
        err,
        EngineError::Resume {
            reason: ResumeRejection::Expired,
            ..
        }
    ));
    let state = state.expect("expired case is returned");
    assert_eq!(state.phase(), Phase::Failed);
    assert!(state.errors().iter().any(|error| error.contains("expired")));
    assert_eq!(
        store.status(&handle).expect("status"),
        Some(HandleStatus::Expired)
    );
    assert!(engine.pending_approvals().expect("pending").is_empty());

    let (err, state) = expect_failed(engine.resume(&handle, ApprovalDecision::approve()));
    assert!(matches!(
        err,
        EngineError::Resume {
            reason: ResumeRejection::Expired,
            ..
        }
    ));
    assert!(state.is_none());
}

#[test]
fn expire_stale_closes_only_overdue_approvals() {
    let store = Arc::new(MemorySuspensionStore::new());
    let engine = gated_engine(store.clone(), Some(3600));

    let (handle, _, _) = expect_suspended(engine.start(AUDITOR_WORKFLOW, auditor_case("audit-ttl")));
    let pending = engine.pending_approvals().expect("pending");
    let deadline = pending[0].expires_at.expect("deadline");
    assert_eq!(deadline, pending[0].suspended_at + 3600);

    assert!(engine.expire_stale(now_secs()).expect("sweep").is_empty());
    assert_eq!(engine.pending_approvals().expect("pending").len(), 1);

    let expired = engine.expire_stale(now_secs() + 7200).expect("sweep");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].handle, handle);
    assert_eq!(expired[0].gate, "plan_approval");
    assert_eq!(expired[0].state.phase(), Phase::Failed);
    assert!(engine.pending_approvals().expect("pending").is_empty());

    let (err, _) = expect_failed(engine.resume(&handle, ApprovalDecision::approve()));
    assert!(matches!(
        err,
        EngineError::Resume {
            reason: ResumeRejection::Expired,
            ..
        }
    ));
    assert_eq!(
        store.status(&handle).expect("status"),
        Some(HandleStatus::Expired)
    );
}

#[test]
fn approvals_without_a_window_never_expire() {
    let engine = gated_engine(Arc::new(MemorySuspensionStore::new()), None);
    let (handle, _, _) =
        expect_suspended(engine.start(AUDITOR_WORKFLOW, auditor_case("audit-open")));
    assert_eq!(
        engine.pending_approvals().expect("pending")[0].expires_at,
        None
    );
    assert!(engine.expire_stale(i64::MAX).expect("sweep").is_empty());

    let (_, gate, _) = expect_suspended(engine.resume(&handle, ApprovalDecision::approve()));
    assert_eq!(gate, "report_approval");
}

/// Store whose disk is full: nothing can be saved.
struct UnwritableStore {
    inner: MemorySuspensionStore,
}

impl SuspensionStore for UnwritableStore {
    fn save(&self, _handle: &CaseHandle, _case_id: &CaseId, _body: &str) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: "cases/pending".to_string(),
            source: std::io::Error::other("no space left on device"),
        })
    }

    fn load(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError> {
        self.inner.load(handle)
    }

    fn cancel(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError> {
        self.inner.cancel(handle)
    }

    fn expire(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError> {
        self.inner.expire(handle)
    }

    fn release(&self, handle: &CaseHandle) -> Result<(), StoreError> {
        self.inner.release(handle)
    }

    fn status(&self, handle: &CaseHandle) -> Result<Option<HandleStatus>, StoreError> {
        self.inner.status(handle)
    }

    fn peek(&self, handle: &CaseHandle) -> Result<Option<(HandleStatus, String)>, StoreError> {
        self.inner.peek(handle)
    }

    fn pending(&self) -> Result<Vec<(CaseHandle, String)>, StoreError> {
        self.inner.pending()
    }

    fn pending_for_case(&self, case_id: &CaseId) -> Result<Option<CaseHandle>, StoreError> {
        self.inner.pending_for_case(case_id)
    }
}

#[test]
fn failed_suspension_save_fails_the_case() {
    let engine = gated_engine(
        Arc::new(UnwritableStore {
            inner: MemorySuspensionStore::new(),
        }),
        None,
    );

    let (err, state) = expect_failed(engine.start(AUDITOR_WORKFLOW, auditor_case("audit-full")));
    assert!(matches!(err, EngineError::Store(StoreError::Io { .. })));
    let state = state.expect("state returned");
    assert_eq!(state.phase(), Phase::Failed);
    assert!(state.is_closed());
    assert!(state
        .errors()
        .iter()
        .any(|error| error.contains("no space left on device")));
    assert!(engine.pending_approvals().expect("pending").is_empty());
}
