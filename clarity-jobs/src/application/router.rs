//! Dual-backend job router
//!
//! New jobs go to the legacy or current backend according to the migration
//! policy. Parked legacy jobs can be moved across in one batch; a job is only
//! deleted from legacy after the current backend has confirmed its copy.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use clarity_core::config::{JobPriority, JobsConfig, MigrationMode, ValidationError};

use super::errors::JobRouterError;
use crate::domain::{
    Backend, BackendError, BackendStats, JobBackend, JobItem, JobPriorityTable, MigrationPolicy,
    Sampler,
};

/// Where an accepted job landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueReceipt {
    pub job_id: String,
    pub backend: Backend,
    pub priority: JobPriority,
    /// Accepted by legacy after the current backend failed
    pub fell_back: bool,
}

/// Outcome of [`JobRouter::migrate_existing_jobs`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub total: u64,
    pub migrated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub duration_ms: u64,
}

/// Share of queued work living on the current backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStats {
    pub legacy_jobs: u64,
    pub current_jobs: u64,
    pub total_jobs: u64,
    /// `current / total * 100`, 0 when nothing is queued
    pub migration_percentage: f64,
}

impl MigrationStats {
    pub fn new(legacy_jobs: u64, current_jobs: u64) -> Self {
        let total_jobs = legacy_jobs + current_jobs;
        let migration_percentage = if total_jobs == 0 {
            0.0
        } else {
            current_jobs as f64 / total_jobs as f64 * 100.0
        };

        Self {
            legacy_jobs,
            current_jobs,
            total_jobs,
            migration_percentage,
        }
    }
}

/// Health, depth and routing counters for both backends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterStatus {
    pub mode: MigrationMode,
    pub current_backend_enabled: bool,
    pub legacy: BackendStats,
    pub current: BackendStats,
    pub routed_current: u64,
    pub routed_legacy: u64,
    pub fallbacks: u64,
    pub failures: u64,
}

#[derive(Default)]
struct RoutingCounters {
    routed_current: AtomicU64,
    routed_legacy: AtomicU64,
    fallbacks: AtomicU64,
    failures: AtomicU64,
}

impl RoutingCounters {
    fn routed(&self, backend: Backend) {
        let counter = match backend {
            Backend::Current => &self.routed_current,
            Backend::Legacy => &self.routed_legacy,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct JobRouter {
    legacy: Arc<dyn JobBackend>,
    current: Arc<dyn JobBackend>,
    policy: MigrationPolicy,
    priorities: JobPriorityTable,
    sampler: Arc<dyn Sampler>,
    operation_timeout: Duration,
    counters: RoutingCounters,
    migration_lock: Mutex<()>,
}

impl JobRouter {
    pub fn new(
        legacy: Arc<dyn JobBackend>,
        current: Arc<dyn JobBackend>,
        policy: MigrationPolicy,
        priorities: JobPriorityTable,
        sampler: Arc<dyn Sampler>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            legacy,
            current,
            policy,
            priorities,
            sampler,
            operation_timeout,
            counters: RoutingCounters::default(),
            migration_lock: Mutex::new(()),
        }
    }

    /// Build from configuration with explicit backends and sampler
    pub fn from_config(
        config: &JobsConfig,
        legacy: Arc<dyn JobBackend>,
        current: Arc<dyn JobBackend>,
        sampler: Arc<dyn Sampler>,
    ) -> Result<Self, ValidationError> {
        Ok(Self::new(
            legacy,
            current,
            MigrationPolicy::from_config(&config.migration)?,
            JobPriorityTable::from_config(config),
            sampler,
            config.operation_timeout(),
        ))
    }

    pub fn policy(&self) -> &MigrationPolicy {
        &self.policy
    }

    pub fn backend(&self, backend: Backend) -> &Arc<dyn JobBackend> {
        match backend {
            Backend::Legacy => &self.legacy,
            Backend::Current => &self.current,
        }
    }

    /// Backends in the order workers drain them
    pub fn backends_in_drain_order(&self) -> Vec<Arc<dyn JobBackend>> {
        vec![Arc::clone(&self.current), Arc::clone(&self.legacy)]
    }

    /// Route a new job and store it.
    ///
    /// When the current backend rejects the job and fallback is enabled, the
    /// job is retried once on legacy under a legacy id.
    pub async fn enqueue(
        &self,
        user_id: &str,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<EnqueueReceipt, JobRouterError> {
        let priority = self.priorities.priority_of(job_type);
        let target = self.policy.route(priority, || self.sampler.sample());
        let job = JobItem::new(target, user_id, job_type, payload, priority);
        let job_id = job.id.clone();

        let primary = match self.call(target, self.backend(target).enqueue(job.clone())).await {
            Ok(()) => {
                self.counters.routed(target);
                info!(
                    job_id = %job_id,
                    job_type = %job_type,
                    priority = %priority,
                    backend = %target,
                    "Job enqueued"
                );
                return Ok(EnqueueReceipt {
                    job_id,
                    backend: target,
                    priority,
                    fell_back: false,
                });
            }
            Err(e) => e,
        };

        if target == Backend::Legacy || !self.policy.fallback_to_legacy() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            error!(
                job_id = %job_id,
                job_type = %job_type,
                backend = %target,
                category = %primary.category(),
                error = %primary,
                "Job enqueue failed"
            );
            return Err(JobRouterError::Enqueue {
                backend: target,
                source: primary,
            });
        }

        let fallback_job = job.reassigned_to(Backend::Legacy);
        let fallback_id = fallback_job.id.clone();
        match self.call(Backend::Legacy, self.legacy.enqueue(fallback_job)).await {
            Ok(()) => {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                self.counters.routed(Backend::Legacy);
                warn!(
                    job_id = %fallback_id,
                    job_type = %job_type,
                    category = %primary.category(),
                    error = %primary,
                    "Current backend rejected job, enqueued on legacy fallback"
                );
                Ok(EnqueueReceipt {
                    job_id: fallback_id,
                    backend: Backend::Legacy,
                    priority,
                    fell_back: true,
                })
            }
            Err(fallback) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    job_id = %job_id,
                    job_type = %job_type,
                    primary_error = %primary,
                    fallback_error = %fallback,
                    "Job enqueue failed on current backend and legacy fallback"
                );
                Err(JobRouterError::FallbackFailed { primary, fallback })
            }
        }
    }

    /// Move every eligible legacy job to the current backend.
    ///
    /// Jobs are visited in dispatch order. Each copy carries the original
    /// metadata and a back-reference; the legacy job is deleted only after the
    /// copy is confirmed. If that delete fails the copy is withdrawn and the
    /// job counts as failed. Only one migration runs at a time.
    pub async fn migrate_existing_jobs(&self) -> Result<MigrationReport, JobRouterError> {
        let _guard = self
            .migration_lock
            .try_lock()
            .map_err(|_| JobRouterError::MigrationInProgress)?;

        let started = Instant::now();
        let jobs = self
            .call(Backend::Legacy, self.legacy.list())
            .await
            .map_err(|source| JobRouterError::Backend {
                backend: Backend::Legacy,
                source,
            })?;

        let mut report = MigrationReport {
            total: jobs.len() as u64,
            ..MigrationReport::default()
        };

        if !self.policy.enable_current_backend() {
            report.skipped = report.total;
            info!(skipped = report.skipped, "Current backend disabled, migration skipped");
            return Ok(report);
        }

        info!(total = report.total, "Starting legacy job migration");

        for job in jobs {
            if !self.policy.is_eligible(job.priority) {
                report.skipped += 1;
                debug!(job_id = %job.id, priority = %job.priority, "Job not eligible for migration");
                continue;
            }

            if self.migrate_one(&job).await {
                report.migrated += 1;
            } else {
                report.failed += 1;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            total = report.total,
            migrated = report.migrated,
            skipped = report.skipped,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "Legacy job migration finished"
        );
        Ok(report)
    }

    async fn migrate_one(&self, job: &JobItem) -> bool {
        let copy = job.migrated_to(Backend::Current);
        let copy_id = copy.id.clone();

        if let Err(e) = self.call(Backend::Current, self.current.enqueue(copy)).await {
            error!(
                job_id = %job.id,
                category = %e.category(),
                error = %e,
                "Failed to copy job to current backend, legacy job kept"
            );
            return false;
        }

        match self.call(Backend::Legacy, self.legacy.delete(&job.id)).await {
            Ok(()) => {
                debug!(job_id = %job.id, new_job_id = %copy_id, "Job migrated");
                true
            }
            Err(delete_error) => {
                match self.call(Backend::Current, self.current.cancel(&copy_id)).await {
                    Ok(()) => error!(
                        job_id = %job.id,
                        error = %delete_error,
                        "Failed to delete migrated legacy job, copy withdrawn"
                    ),
                    Err(cancel_error) => error!(
                        job_id = %job.id,
                        new_job_id = %copy_id,
                        error = %delete_error,
                        cancel_error = %cancel_error,
                        "Failed to delete migrated legacy job and to withdraw its copy; job may run twice"
                    ),
                }
                false
            }
        }
    }

    /// Cancel a job wherever it lives. Returns the backend that held it.
    ///
    /// The id namespace picks the first backend to ask; the other is only
    /// asked when the first reports the job missing.
    pub async fn cancel(&self, job_id: &str) -> Result<Backend, JobRouterError> {
        let first = Backend::owner_of(job_id).unwrap_or(Backend::Current);

        for backend in [first, first.other()] {
            match self.call(backend, self.backend(backend).cancel(job_id)).await {
                Ok(()) => {
                    info!(job_id = %job_id, backend = %backend, "Job cancelled");
                    return Ok(backend);
                }
                Err(e) if e.is_not_found() => {
                    debug!(job_id = %job_id, backend = %backend, "Job not on backend");
                }
                Err(source) => {
                    warn!(
                        job_id = %job_id,
                        backend = %backend,
                        category = %source.category(),
                        error = %source,
                        "Job cancel failed"
                    );
                    return Err(JobRouterError::Backend { backend, source });
                }
            }
        }

        Err(JobRouterError::NotFound(job_id.to_string()))
    }

    /// Backend health and depth plus routing counters. A backend whose stats
    /// cannot be read is reported unhealthy with zero depth.
    pub async fn get_status(&self) -> RouterStatus {
        RouterStatus {
            mode: self.policy.mode(),
            current_backend_enabled: self.policy.enable_current_backend(),
            legacy: self.backend_stats(Backend::Legacy).await,
            current: self.backend_stats(Backend::Current).await,
            routed_current: self.counters.routed_current.load(Ordering::Relaxed),
            routed_legacy: self.counters.routed_legacy.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub async fn get_migration_stats(&self) -> Result<MigrationStats, JobRouterError> {
        let legacy = self.queued(Backend::Legacy).await?;
        let current = self.queued(Backend::Current).await?;
        Ok(MigrationStats::new(legacy, current))
    }

    async fn queued(&self, backend: Backend) -> Result<u64, JobRouterError> {
        self.call(backend, self.backend(backend).stats())
            .await
            .map(|stats| stats.queued)
            .map_err(|source| JobRouterError::Backend { backend, source })
    }

    async fn backend_stats(&self, backend: Backend) -> BackendStats {
        let store = self.backend(backend);
        let stats = self.call(backend, store.stats()).await;
        let healthy = tokio::time::timeout(self.operation_timeout, store.health_check())
            .await
            .unwrap_or(false);

        match stats {
            Ok(stats) => BackendStats { healthy, ..stats },
            Err(e) => {
                warn!(backend = %backend, error = %e, "Job backend stats unavailable");
                BackendStats {
                    backend,
                    queued: 0,
                    healthy: false,
                }
            }
        }
    }

    /// Run a backend call under the operation timeout
    async fn call<T, F>(&self, backend: Backend, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                debug!(backend = %backend, "Job backend call timed out");
                Err(BackendError::Timeout {
                    timeout_ms: self.operation_timeout.as_millis() as u64,
                })
            }
        }
    }
}
