/// Confidence below which a step's output needs a human decision.
pub const CONFIDENCE_THRESHOLD: f64 = 0.75;

pub fn should_escalate(confidence: f64) -> bool {
    confidence < CONFIDENCE_THRESHOLD
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationPolicy;

impl EscalationPolicy {
    pub fn threshold(&self) -> f64 {
        CONFIDENCE_THRESHOLD
    }

    pub fn should_escalate(&self, confidence: f64) -> bool {
        should_escalate(confidence)
    }
}
