use crate::orchestration::error::EngineError;
use crate::orchestration::step::Step;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    pub name: String,
    pub description: String,
}

/// Name to step lookup, built once by the process entry point and handed to
/// the engine.
#[derive(Default, Clone)]
pub struct StepRegistry {
    steps: BTreeMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `step` under its own name, replacing any earlier entry.
    pub fn register(&mut self, step: Arc<dyn Step>) {
        self.steps.insert(step.name().to_string(), step);
    }

    pub fn with(mut self, step: impl Step + 'static) -> Self {
        self.register(Arc::new(step));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Step>, EngineError> {
        self.steps
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStep {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn list(&self) -> Vec<StepDescriptor> {
        self.steps
            .values()
            .map(|step| StepDescriptor {
                name: step.name().to_string(),
                description: step.description().to_string(),
            })
            .collect()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}
