//! Router fixtures

use std::sync::Arc;
use std::time::Duration;

use clarity_core::config::{JobsConfig, MigrationMode, MigrationPolicyConfig};
use clarity_jobs::JobRouter;
use clarity_jobs::domain::{Backend, JobBackend, JobPriorityTable, MigrationPolicy, Sampler};
use clarity_jobs::infrastructure::InMemoryJobBackend;

use super::mocks::FixedSampler;

pub fn policy(mode: MigrationMode) -> MigrationPolicy {
    MigrationPolicy::from_config(&MigrationPolicyConfig {
        mode,
        ..MigrationPolicyConfig::default()
    })
    .expect("valid policy")
}

pub fn router_with(
    legacy: Arc<dyn JobBackend>,
    current: Arc<dyn JobBackend>,
    policy: MigrationPolicy,
    sampler: Arc<dyn Sampler>,
) -> JobRouter {
    JobRouter::new(
        legacy,
        current,
        policy,
        JobPriorityTable::from_config(&JobsConfig::default()),
        sampler,
        Duration::from_millis(200),
    )
}

/// Router over two in-memory backends, returned alongside them
pub fn memory_router(
    mode: MigrationMode,
) -> (JobRouter, Arc<InMemoryJobBackend>, Arc<InMemoryJobBackend>) {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let current = Arc::new(InMemoryJobBackend::new(Backend::Current));
    let router = router_with(
        legacy.clone(),
        current.clone(),
        policy(mode),
        Arc::new(FixedSampler(0.5)),
    );
    (router, legacy, current)
}
