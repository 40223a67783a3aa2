//! Wiring for the process entry point: one registry, one store, one engine.

use crate::config::{AuditTrailKind, EngineSettings, StoreKind};
use crate::orchestration::{
    AuditTrail, DefinitionError, EngineError, JsonlAuditTrail, MemoryAuditTrail, MetricsSink,
    NoopAuditTrail, StepRegistry, WorkflowEngine,
};
use crate::shared::EventLog;
use crate::steps::{register_auditee_steps, register_auditor_steps, AgentBackend};
use crate::store::{
    FileSuspensionStore, MemorySuspensionStore, SqliteSuspensionStore, StoreError,
    SuspensionStore,
};
use crate::workflows::all_workflows;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Registry holding every auditor and auditee step.
pub fn default_registry(backend: Arc<dyn AgentBackend>, log: EventLog) -> StepRegistry {
    let mut registry = StepRegistry::new();
    register_auditor_steps(&mut registry, backend.clone());
    register_auditee_steps(&mut registry, backend, log);
    registry
}

pub fn build_store(settings: &EngineSettings) -> Result<Arc<dyn SuspensionStore>, StoreError> {
    Ok(match settings.store {
        StoreKind::File => Arc::new(FileSuspensionStore::new(&settings.state_root)?),
        StoreKind::Sqlite => Arc::new(SqliteSuspensionStore::for_state_root(&settings.state_root)?),
        StoreKind::Memory => Arc::new(MemorySuspensionStore::new()),
    })
}

pub fn build_engine(
    settings: &EngineSettings,
    backend: Arc<dyn AgentBackend>,
    metrics: Arc<dyn MetricsSink>,
) -> Result<WorkflowEngine, BootstrapError> {
    settings.validate()?;

    let log = if settings.event_log {
        EventLog::for_state_root(&settings.state_root)
    } else {
        EventLog::disabled()
    };
    let audit_trail: Arc<dyn AuditTrail> = match settings.audit_trail {
        AuditTrailKind::Jsonl => Arc::new(JsonlAuditTrail::for_state_root(&settings.state_root)),
        AuditTrailKind::Memory => Arc::new(MemoryAuditTrail::new()),
        AuditTrailKind::Disabled => Arc::new(NoopAuditTrail),
    };
    let registry = Arc::new(default_registry(backend, log.clone()));

    let mut builder = WorkflowEngine::builder(registry, build_store(settings)?)
        .audit_trail(audit_trail)
        .metrics(metrics)
        .limits(settings.execution_limits())
        .on_reject(settings.on_reject)
        .event_log(log);
    if let Some(ttl) = settings.approval_ttl_secs {
        builder = builder.approval_ttl_secs(ttl);
    }
    for definition in all_workflows()? {
        builder = builder.workflow(definition);
    }
    Ok(builder.build()?)
}
