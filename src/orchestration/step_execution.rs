use crate::case::{ApprovalRequest, CaseState, StateUpdate};
use crate::orchestration::audit_trail::{AuditTrail, DecisionRecord};
use crate::orchestration::error::EngineError;
use crate::orchestration::escalation::EscalationPolicy;
use crate::orchestration::metrics::{MetricsSink, StepOutcome};
use crate::orchestration::step::{Step, StepContext, StepError, StepOutput};
use crate::shared::{now_secs, EventLog};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of one instrumented step call, ready to be merged by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEvaluation {
    pub update: StateUpdate,
    pub confidence: f64,
    pub escalated: bool,
    pub elapsed: Duration,
}

/// Wraps every step call with timing, metrics, escalation and the decision
/// record, so concrete steps only carry domain logic.
#[derive(Clone)]
pub struct StepExecutor {
    policy: EscalationPolicy,
    metrics: Arc<dyn MetricsSink>,
    audit_trail: Arc<dyn AuditTrail>,
    log: EventLog,
}

impl StepExecutor {
    pub fn new(
        metrics: Arc<dyn MetricsSink>,
        audit_trail: Arc<dyn AuditTrail>,
        log: EventLog,
    ) -> Self {
        Self {
            policy: EscalationPolicy,
            metrics,
            audit_trail,
            log,
        }
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    pub fn execute(
        &self,
        step: &dyn Step,
        state: &CaseState,
        ctx: &StepContext,
    ) -> Result<StepEvaluation, EngineError> {
        let started = Instant::now();
        let result = step.execute(state, ctx);
        let elapsed = started.elapsed();

        let output = match result.and_then(validate_confidence) {
            Ok(output) => output,
            Err(source) => {
                self.metrics
                    .step_finished(step.name(), StepOutcome::Failure, elapsed);
                self.log.warn(
                    "step.failed",
                    &format!(
                        "case_id={} node={} step={} error={}",
                        state.case_id(),
                        ctx.node(),
                        step.name(),
                        source
                    ),
                );
                return Err(EngineError::StepExecution {
                    step: step.name().to_string(),
                    source,
                });
            }
        };

        self.metrics
            .step_finished(step.name(), StepOutcome::Success, elapsed);
        self.metrics
            .confidence_observed(step.name(), output.confidence);

        let StepOutput {
            mut update,
            confidence,
            decision,
            on_escalation,
        } = output;

        let escalated = self.policy.should_escalate(confidence);
        if escalated && update.approval.is_none() {
            update.approval = Some(
                on_escalation
                    .unwrap_or_else(|| ApprovalRequest::low_confidence(step.name(), confidence)),
            );
            self.log.info(
                "step.escalated",
                &format!(
                    "case_id={} step={} confidence={confidence:.2}",
                    state.case_id(),
                    step.name()
                ),
            );
        }

        let record = DecisionRecord {
            tenant_id: state.tenant_id().clone(),
            case_id: state.case_id().clone(),
            step_name: step.name().to_string(),
            decision: decision.label,
            reasoning: decision.reasoning,
            confidence,
            resource_type: decision.resource_type,
            resource_id: decision.resource_id,
            escalated,
            recorded_at: now_secs(),
        };
        if let Err(err) = self.audit_trail.record(&record) {
            self.log.warn(
                "audit.record_failed",
                &format!(
                    "case_id={} step={} error={}",
                    state.case_id(),
                    step.name(),
                    err
                ),
            );
        }

        self.log.info(
            "step.finished",
            &format!(
                "case_id={} node={} step={} confidence={confidence:.2} elapsed_ms={}",
                state.case_id(),
                ctx.node(),
                step.name(),
                elapsed.as_millis()
            ),
        );

        Ok(StepEvaluation {
            update,
            confidence,
            escalated,
            elapsed,
        })
    }
}

fn validate_confidence(output: StepOutput) -> Result<StepOutput, StepError> {
    if output.confidence.is_nan() || !(0.0..=1.0).contains(&output.confidence) {
        return Err(StepError::InvalidConfidence {
            value: output.confidence,
        });
    }
    Ok(output)
}
