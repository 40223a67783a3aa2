use crate::case::{CaseState, ExecutionOutcome, ExecutionRecord, Phase};
use crate::orchestration::audit_trail::{AuditTrail, NoopAuditTrail};
use crate::orchestration::case_leases::{CaseLease, CaseLeases};
use crate::orchestration::definition::{Next, StepNode, WorkflowDefinition};
use crate::orchestration::error::{EngineError, ResumeRejection};
use crate::orchestration::metrics::{MetricsSink, NoopMetrics};
use crate::orchestration::registry::StepRegistry;
use crate::orchestration::step::{StepContext, StepError};
use crate::orchestration::step_execution::StepExecutor;
use crate::shared::{now_secs, CaseHandle, CaseId, EventLog, TenantId};
use crate::store::{HandleLookup, HandleStatus, SuspensionStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub max_steps_per_run: u32,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps_per_run: 64,
        }
    }
}

/// Terminal phase given to a case whose approval is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    #[default]
    Fail,
    Cancel,
}

impl RejectionPolicy {
    fn terminal_phase(self) -> Phase {
        match self {
            Self::Fail => Phase::Failed,
            Self::Cancel => Phase::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve { note: Option<String> },
    Reject { reason: String },
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self::Approve { note: None }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }
}

impl FromStr for ApprovalDecision {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::approve()),
            "reject" => Ok(Self::reject("rejected by reviewer")),
            _ => Err(EngineError::InvalidDecision(raw.to_string())),
        }
    }
}

/// Persisted form of a case waiting at an approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedCase {
    pub handle: CaseHandle,
    pub workflow_id: String,
    pub gate: String,
    pub suspended_at: i64,
    /// Unix seconds after which the approval can no longer be given.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub state: CaseState,
}

impl SuspendedCase {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suspension {
    pub handle: CaseHandle,
    pub gate: String,
    pub expires_at: Option<i64>,
    pub state: CaseState,
}

/// A suspended case closed because nobody decided in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredApproval {
    pub handle: CaseHandle,
    pub gate: String,
    pub state: CaseState,
}

#[derive(Debug)]
pub struct CaseFailure {
    pub error: EngineError,
    /// Case as it stood when the run stopped; `None` when the engine never
    /// took ownership of it.
    pub state: Option<CaseState>,
}

/// Exactly one of these is returned by every start or resume.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(CaseState),
    Suspended(Suspension),
    Failed(CaseFailure),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }

    pub fn state(&self) -> Option<&CaseState> {
        match self {
            Self::Completed(state) => Some(state),
            Self::Suspended(suspension) => Some(&suspension.state),
            Self::Failed(failure) => failure.state.as_ref(),
        }
    }

    pub fn handle(&self) -> Option<&CaseHandle> {
        match self {
            Self::Suspended(suspension) => Some(&suspension.handle),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Failed(failure) => Some(&failure.error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingApproval {
    pub handle: CaseHandle,
    pub workflow_id: String,
    pub gate: String,
    pub tenant_id: TenantId,
    pub case_id: CaseId,
    pub approval_context: Map<String, Value>,
    pub suspended_at: i64,
    pub expires_at: Option<i64>,
}

pub struct WorkflowEngineBuilder {
    registry: Arc<StepRegistry>,
    store: Arc<dyn SuspensionStore>,
    workflows: Vec<WorkflowDefinition>,
    audit_trail: Arc<dyn AuditTrail>,
    metrics: Arc<dyn MetricsSink>,
    limits: ExecutionLimits,
    on_reject: RejectionPolicy,
    approval_ttl_secs: Option<u64>,
    log: EventLog,
}

impl WorkflowEngineBuilder {
    pub fn workflow(mut self, definition: WorkflowDefinition) -> Self {
        self.workflows.push(definition);
        self
    }

    pub fn audit_trail(mut self, audit_trail: Arc<dyn AuditTrail>) -> Self {
        self.audit_trail = audit_trail;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn on_reject(mut self, policy: RejectionPolicy) -> Self {
        self.on_reject = policy;
        self
    }

    /// Seconds a suspended case waits for a decision before it expires.
    pub fn approval_ttl_secs(mut self, ttl: u64) -> Self {
        self.approval_ttl_secs = Some(ttl);
        self
    }

    pub fn event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Fails when any workflow names a step the registry does not hold.
    pub fn build(self) -> Result<WorkflowEngine, EngineError> {
        let mut workflows = BTreeMap::new();
        for definition in self.workflows {
            for step in definition.step_names() {
                if !self.registry.contains(step) {
                    return Err(EngineError::UnknownStep {
                        name: step.to_string(),
                    });
                }
            }
            workflows.insert(definition.id().to_string(), Arc::new(definition));
        }

        Ok(WorkflowEngine {
            registry: self.registry,
            workflows,
            store: self.store,
            executor: StepExecutor::new(self.metrics, self.audit_trail, self.log.clone()),
            leases: CaseLeases::new(),
            limits: self.limits,
            on_reject: self.on_reject,
            approval_ttl_secs: self.approval_ttl_secs,
            log: self.log,
        })
    }
}

/// Walks workflow definitions for cases: runs steps, merges their updates,
/// routes, and suspends at approval gates until an external decision
/// resumes the case.
pub struct WorkflowEngine {
    registry: Arc<StepRegistry>,
    workflows: BTreeMap<String, Arc<WorkflowDefinition>>,
    store: Arc<dyn SuspensionStore>,
    executor: StepExecutor,
    leases: CaseLeases,
    limits: ExecutionLimits,
    on_reject: RejectionPolicy,
    approval_ttl_secs: Option<u64>,
    log: EventLog,
}

impl WorkflowEngine {
    pub fn builder(
        registry: Arc<StepRegistry>,
        store: Arc<dyn SuspensionStore>,
    ) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            registry,
            store,
            workflows: Vec::new(),
            audit_trail: Arc::new(NoopAuditTrail),
            metrics: Arc::new(NoopMetrics),
            limits: ExecutionLimits::default(),
            on_reject: RejectionPolicy::default(),
            approval_ttl_secs: None,
            log: EventLog::disabled(),
        }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn workflow_ids(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(workflow_id).map(Arc::as_ref)
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.limits
    }

    pub fn is_running(&self, case_id: &CaseId) -> bool {
        self.leases.is_running(case_id)
    }

    pub fn start(&self, workflow_id: &str, state: CaseState) -> RunOutcome {
        let Some(definition) = self.workflows.get(workflow_id).cloned() else {
            return rejected(
                EngineError::UnknownWorkflow {
                    workflow_id: workflow_id.to_string(),
                },
                Some(state),
            );
        };
        if state.is_closed() {
            return rejected(
                EngineError::CaseClosed {
                    case_id: state.case_id().clone(),
                    phase: state.phase(),
                },
                Some(state),
            );
        }
        let lease = match self.leases.acquire(state.case_id()) {
            Ok(lease) => lease,
            Err(err) => return rejected(err, Some(state)),
        };
        // suspend and resume hold this lease too
        match self.store.pending_for_case(state.case_id()) {
            Ok(None) => {}
            Ok(Some(handle)) => {
                self.log.warn(
                    "case.start_rejected",
                    &format!("case_id={} pending_handle={}", state.case_id(), handle),
                );
                return rejected(
                    EngineError::CaseBusy {
                        case_id: state.case_id().clone(),
                    },
                    Some(state),
                );
            }
            Err(err) => return rejected(EngineError::Store(err), Some(state)),
        }

        self.log.info(
            "case.started",
            &format!(
                "case_id={} tenant_id={} workflow={} phase={}",
                state.case_id(),
                state.tenant_id(),
                workflow_id,
                state.phase()
            ),
        );
        self.drive(&definition, Next::Node(definition.start()), state, &lease)
    }

    pub fn resume(&self, handle: &CaseHandle, decision: ApprovalDecision) -> RunOutcome {
        let waiting = match self.inspect(handle) {
            Ok(record) => record,
            Err(err) => return rejected(err, None),
        };
        let lease = match self.leases.acquire(waiting.state.case_id()) {
            Ok(lease) => lease,
            Err(err) => return rejected(err, None),
        };
        if waiting.is_expired(now_secs()) {
            return match self.expire_pending(handle) {
                Ok(expired) => RunOutcome::Failed(CaseFailure {
                    error: EngineError::Resume {
                        handle: handle.clone(),
                        reason: ResumeRejection::Expired,
                    },
                    state: Some(expired.state),
                }),
                Err(err) => rejected(err, None),
            };
        }

        let record = match self.claim(handle) {
            Ok(record) => record,
            Err(err) => return rejected(err, None),
        };
        let SuspendedCase {
            workflow_id,
            gate,
            mut state,
            ..
        } = record;

        let Some(definition) = self.workflows.get(&workflow_id).cloned() else {
            self.release(handle);
            return rejected(EngineError::UnknownWorkflow { workflow_id }, None);
        };
        let Some(gate_node) = definition.node(&gate).filter(|node| node.is_gate()) else {
            self.release(handle);
            return rejected(
                EngineError::Routing {
                    workflow: workflow_id,
                    node: gate,
                },
                None,
            );
        };

        match decision {
            ApprovalDecision::Approve { note } => {
                state.clear_approval();
                if let Some(note) = note {
                    state.insert_metadata("approval_note", Value::String(note));
                }
                state.record_execution(gate_record(gate_node, ExecutionOutcome::Approved, &state));
                self.log.info(
                    "case.resumed",
                    &format!(
                        "case_id={} handle={} gate={} decision=approve",
                        state.case_id(),
                        handle,
                        gate
                    ),
                );
                match definition.next(&gate_node.id, &state) {
                    Ok(next) => self.drive(&definition, next, state, &lease),
                    Err(err) => self.fail(state, err),
                }
            }
            ApprovalDecision::Reject { reason } => {
                state.record_error(format!("approval rejected at `{gate}`: {reason}"));
                state.record_execution(gate_record(gate_node, ExecutionOutcome::Rejected, &state));
                state.finish(self.on_reject.terminal_phase());
                self.log.warn(
                    "case.failed",
                    &format!(
                        "case_id={} handle={} gate={} decision=reject phase={}",
                        state.case_id(),
                        handle,
                        gate,
                        state.phase()
                    ),
                );
                RunOutcome::Failed(CaseFailure {
                    error: EngineError::ApprovalRejected { gate, reason },
                    state: Some(state),
                })
            }
        }
    }

    /// Cancels a suspended case. Its handle can no longer be resumed.
    pub fn cancel(&self, handle: &CaseHandle) -> Result<CaseState, EngineError> {
        let body = pending_body(handle, self.store.cancel(handle)?)?;
        let record: SuspendedCase = serde_json::from_str(&body).map_err(EngineError::Record)?;
        let mut state = record.state;
        state.record_error(format!(
            "case cancelled while awaiting approval at `{}`",
            record.gate
        ));
        state.finish(Phase::Cancelled);
        self.log.info(
            "case.cancelled",
            &format!("case_id={} handle={}", state.case_id(), handle),
        );
        Ok(state)
    }

    /// Requests cooperative cancellation of an in-flight run. Returns false
    /// when the case is not running.
    pub fn cancel_running(&self, case_id: &CaseId) -> bool {
        self.leases.cancel(case_id)
    }

    pub fn pending_approvals(&self) -> Result<Vec<PendingApproval>, EngineError> {
        self.store
            .pending()?
            .into_iter()
            .map(|(_, body)| {
                let record: SuspendedCase =
                    serde_json::from_str(&body).map_err(EngineError::Record)?;
                Ok(PendingApproval {
                    handle: record.handle,
                    workflow_id: record.workflow_id,
                    gate: record.gate,
                    tenant_id: record.state.tenant_id().clone(),
                    case_id: record.state.case_id().clone(),
                    approval_context: record.state.approval_context().clone(),
                    suspended_at: record.suspended_at,
                    expires_at: record.expires_at,
                })
            })
            .collect()
    }

    /// Expires every pending approval whose deadline is at or before `now`.
    /// The engine never sweeps on its own; callers schedule this.
    pub fn expire_stale(&self, now: i64) -> Result<Vec<ExpiredApproval>, EngineError> {
        let mut expired = Vec::new();
        for (handle, body) in self.store.pending()? {
            let record: SuspendedCase = serde_json::from_str(&body).map_err(EngineError::Record)?;
            if !record.is_expired(now) {
                continue;
            }
            match self.expire_pending(&handle) {
                Ok(approval) => expired.push(approval),
                // resumed or cancelled since the listing
                Err(EngineError::Resume { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(expired)
    }

    /// Reads a pending record without claiming it.
    fn inspect(&self, handle: &CaseHandle) -> Result<SuspendedCase, EngineError> {
        match self.store.peek(handle)? {
            Some((HandleStatus::Pending, body)) => {
                serde_json::from_str(&body).map_err(EngineError::Record)
            }
            Some((status, _)) => Err(EngineError::Resume {
                handle: handle.clone(),
                reason: closed_reason(status),
            }),
            None => Err(EngineError::Resume {
                handle: handle.clone(),
                reason: ResumeRejection::UnknownHandle,
            }),
        }
    }

    fn claim(&self, handle: &CaseHandle) -> Result<SuspendedCase, EngineError> {
        let body = pending_body(handle, self.store.load(handle)?)?;
        serde_json::from_str(&body).map_err(EngineError::Record)
    }

    fn expire_pending(&self, handle: &CaseHandle) -> Result<ExpiredApproval, EngineError> {
        let body = pending_body(handle, self.store.expire(handle)?)?;
        let record: SuspendedCase = serde_json::from_str(&body).map_err(EngineError::Record)?;
        let mut state = record.state;
        state.record_error(format!("approval at `{}` expired", record.gate));
        state.finish(Phase::Failed);
        self.log.warn(
            "case.expired",
            &format!(
                "case_id={} handle={} gate={}",
                state.case_id(),
                handle,
                record.gate
            ),
        );
        Ok(ExpiredApproval {
            handle: record.handle,
            gate: record.gate,
            state,
        })
    }

    fn release(&self, handle: &CaseHandle) {
        if let Err(err) = self.store.release(handle) {
            self.log.error(
                "case.release_failed",
                &format!("handle={handle} error={err}"),
            );
        }
    }

    fn drive(
        &self,
        definition: &WorkflowDefinition,
        first: Next<'_>,
        mut state: CaseState,
        lease: &CaseLease,
    ) -> RunOutcome {
        let mut next = first;
        let mut executed = 0u32;

        loop {
            let node = match next {
                Next::Terminal(terminal) => return self.complete(state, terminal),
                Next::Node(node) => node,
            };
            if lease.token().is_cancelled() {
                return self.cancelled(state);
            }
            let Some(step_name) = node.step() else {
                return self.suspend(definition, node, state);
            };
            if executed >= self.limits.max_steps_per_run {
                return self.fail(
                    state,
                    EngineError::StepLimitExceeded {
                        max_steps_per_run: self.limits.max_steps_per_run,
                    },
                );
            }
            executed += 1;

            let step = match self.registry.get(step_name) {
                Ok(step) => step,
                Err(err) => return self.fail(state, err),
            };
            let ctx = StepContext::new(node.id.clone(), lease.token().clone());
            let started = Instant::now();
            let evaluation = match self.executor.execute(step.as_ref(), &state, &ctx) {
                Ok(evaluation) => evaluation,
                Err(EngineError::StepExecution {
                    source: StepError::Cancelled,
                    ..
                }) if lease.token().is_cancelled() => return self.cancelled(state),
                Err(err) => {
                    state.record_execution(ExecutionRecord {
                        node: node.id.clone(),
                        step: Some(step_name.to_string()),
                        outcome: ExecutionOutcome::Failed,
                        duration_ms: elapsed_ms(started),
                        confidence: None,
                        escalated: false,
                        phase_after: state.phase(),
                    });
                    return self.fail(state, err);
                }
            };

            if let Err(source) = state.apply_update(evaluation.update) {
                return self.fail(
                    state,
                    EngineError::Merge {
                        step: step_name.to_string(),
                        source,
                    },
                );
            }
            state.set_current_step(&node.id);
            state.record_execution(ExecutionRecord {
                node: node.id.clone(),
                step: Some(step_name.to_string()),
                outcome: ExecutionOutcome::Succeeded,
                duration_ms: u64::try_from(evaluation.elapsed.as_millis()).unwrap_or(u64::MAX),
                confidence: Some(evaluation.confidence),
                escalated: evaluation.escalated,
                phase_after: state.phase(),
            });

            next = match definition.next(&node.id, &state) {
                Ok(next) => next,
                Err(err) => return self.fail(state, err),
            };
        }
    }

    fn suspend(
        &self,
        definition: &WorkflowDefinition,
        gate: &StepNode,
        state: CaseState,
    ) -> RunOutcome {
        let handle = match CaseHandle::generate() {
            Ok(handle) => handle,
            Err(reason) => return self.fail(state, EngineError::HandleGeneration(reason)),
        };
        let suspended_at = now_secs();
        let expires_at = self
            .approval_ttl_secs
            .map(|ttl| suspended_at.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)));
        let record = SuspendedCase {
            handle: handle.clone(),
            workflow_id: definition.id().to_string(),
            gate: gate.id.clone(),
            suspended_at,
            expires_at,
            state,
        };
        let body = match serde_json::to_string(&record) {
            Ok(body) => body,
            Err(err) => return self.fail(record.state, EngineError::Record(err)),
        };
        if let Err(err) = self.store.save(&handle, record.state.case_id(), &body) {
            self.log.error(
                "case.suspend_failed",
                &format!(
                    "case_id={} gate={} error={}",
                    record.state.case_id(),
                    gate.id,
                    err
                ),
            );
            return self.fail(record.state, EngineError::Store(err));
        }

        self.log.info(
            "case.suspended",
            &format!(
                "case_id={} workflow={} gate={} handle={}",
                record.state.case_id(),
                definition.id(),
                gate.id,
                handle
            ),
        );
        RunOutcome::Suspended(Suspension {
            handle,
            gate: record.gate,
            expires_at,
            state: record.state,
        })
    }

    fn complete(&self, mut state: CaseState, terminal: &str) -> RunOutcome {
        state.finish(Phase::Completed);
        self.log.info(
            "case.completed",
            &format!("case_id={} terminal={}", state.case_id(), terminal),
        );
        RunOutcome::Completed(state)
    }

    fn cancelled(&self, mut state: CaseState) -> RunOutcome {
        let case_id = state.case_id().clone();
        state.record_error("case cancelled while running");
        state.finish(Phase::Cancelled);
        self.log.info("case.cancelled", &format!("case_id={case_id}"));
        RunOutcome::Failed(CaseFailure {
            error: EngineError::Cancelled { case_id },
            state: Some(state),
        })
    }

    fn fail(&self, mut state: CaseState, error: EngineError) -> RunOutcome {
        state.record_error(error.to_string());
        state.finish(Phase::Failed);
        self.log.error(
            "case.failed",
            &format!("case_id={} error={}", state.case_id(), error),
        );
        RunOutcome::Failed(CaseFailure {
            error,
            state: Some(state),
        })
    }
}

fn rejected(error: EngineError, state: Option<CaseState>) -> RunOutcome {
    RunOutcome::Failed(CaseFailure { error, state })
}

fn closed_reason(status: HandleStatus) -> ResumeRejection {
    match status {
        HandleStatus::Cancelled => ResumeRejection::Cancelled,
        HandleStatus::Expired => ResumeRejection::Expired,
        HandleStatus::Resumed | HandleStatus::Pending => ResumeRejection::AlreadyResumed,
    }
}

fn pending_body(handle: &CaseHandle, lookup: HandleLookup) -> Result<String, EngineError> {
    match lookup {
        HandleLookup::Pending(body) => Ok(body),
        HandleLookup::Closed(status) => Err(EngineError::Resume {
            handle: handle.clone(),
            reason: closed_reason(status),
        }),
        HandleLookup::Unknown => Err(EngineError::Resume {
            handle: handle.clone(),
            reason: ResumeRejection::UnknownHandle,
        }),
    }
}

fn gate_record(gate: &StepNode, outcome: ExecutionOutcome, state: &CaseState) -> ExecutionRecord {
    ExecutionRecord {
        node: gate.id.clone(),
        step: None,
        outcome,
        duration_ms: 0,
        confidence: None,
        escalated: false,
        phase_after: state.phase(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
