//! Integration tests for the dual-backend job router
//!
//! Tests cover:
//! - Routing per migration mode
//! - Legacy fallback on enqueue failure and timeout
//! - Legacy migration, including compensation and single-flight
//! - Cancellation across id namespaces
//! - Status and migration statistics

mod common;

use std::sync::Arc;
use std::time::Duration;

use clarity_core::config::{JobPriority, MigrationMode, MigrationPolicyConfig};
use clarity_jobs::domain::{Backend, BackendError, JobBackend, JobItem, MigrationPolicy};
use clarity_jobs::infrastructure::InMemoryJobBackend;
use clarity_jobs::JobRouterError;

use common::*;

fn legacy_job(priority: JobPriority) -> JobItem {
    JobItem::new(
        Backend::Legacy,
        "user-7",
        "tax_report",
        serde_json::json!({"year": 2025, "account": "brokerage"}),
        priority,
    )
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_immediate_mode_always_targets_current() {
    let (router, legacy, current) = memory_router(MigrationMode::Immediate);

    for job_type in ["price_refresh", "portfolio_sync", "email_digest", "unlisted"] {
        let receipt = router
            .enqueue("user-1", job_type, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(receipt.backend, Backend::Current);
        assert!(receipt.job_id.starts_with("job_"));
        assert!(!receipt.fell_back);
    }

    assert_eq!(current.len().await, 4);
    assert!(legacy.is_empty().await);
}

#[tokio::test]
async fn test_gradual_mode_routes_by_priority_eligibility() {
    let (router, _legacy, _current) = memory_router(MigrationMode::Gradual);

    let cases = [
        ("email_digest", Backend::Current, JobPriority::Low),
        ("dividend_forecast", Backend::Current, JobPriority::Medium),
        ("portfolio_sync", Backend::Legacy, JobPriority::High),
        ("price_refresh", Backend::Legacy, JobPriority::Critical),
        ("unlisted", Backend::Current, JobPriority::Medium),
    ];

    for (job_type, expected, priority) in cases {
        let receipt = router
            .enqueue("user-1", job_type, serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(receipt.backend, expected, "job type {}", job_type);
        assert_eq!(receipt.priority, priority);
        assert!(receipt.job_id.starts_with(expected.id_prefix()));
    }
}

#[tokio::test]
async fn test_testing_mode_follows_sampler() {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let current = Arc::new(InMemoryJobBackend::new(Backend::Current));
    let router = router_with(
        legacy.clone(),
        current.clone(),
        policy(MigrationMode::Testing),
        Arc::new(SequenceSampler::new([0.05, 0.5, 0.099])),
    );

    let first = router.enqueue("u", "price_refresh", serde_json::Value::Null).await.unwrap();
    let second = router.enqueue("u", "price_refresh", serde_json::Value::Null).await.unwrap();
    let third = router.enqueue("u", "email_digest", serde_json::Value::Null).await.unwrap();

    assert_eq!(first.backend, Backend::Current);
    assert_eq!(second.backend, Backend::Legacy);
    assert_eq!(third.backend, Backend::Current);
}

// ============================================================================
// Fallback
// ============================================================================

#[tokio::test]
async fn test_current_failure_falls_back_to_legacy() {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let current = Arc::new(FailingBackend::unavailable(Backend::Current));
    let router = router_with(
        legacy.clone(),
        current.clone(),
        policy(MigrationMode::Immediate),
        Arc::new(FixedSampler(0.5)),
    );

    let receipt = router
        .enqueue("user-1", "portfolio_sync", serde_json::json!({"broker": "ibkr"}))
        .await
        .unwrap();

    assert!(receipt.fell_back);
    assert_eq!(receipt.backend, Backend::Legacy);
    assert!(receipt.job_id.starts_with("legacy_"));
    assert_eq!(current.calls(), 1);

    let stored = legacy.get(&receipt.job_id).await.unwrap();
    assert_eq!(stored.payload, serde_json::json!({"broker": "ibkr"}));
    assert_eq!(stored.target_backend, Backend::Legacy);

    let status = router.get_status().await;
    assert_eq!(status.fallbacks, 1);
    assert_eq!(status.routed_legacy, 1);
    assert_eq!(status.routed_current, 0);
}

#[tokio::test]
async fn test_current_timeout_falls_back_to_legacy() {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let router = router_with(
        legacy.clone(),
        Arc::new(HangingBackend(Backend::Current)),
        policy(MigrationMode::Immediate),
        Arc::new(FixedSampler(0.5)),
    );

    let receipt = router
        .enqueue("user-1", "email_digest", serde_json::Value::Null)
        .await
        .unwrap();

    assert!(receipt.fell_back);
    assert_eq!(legacy.len().await, 1);
}

#[tokio::test]
async fn test_no_fallback_when_disabled() {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let policy = MigrationPolicy::from_config(&MigrationPolicyConfig {
        mode: MigrationMode::Immediate,
        fallback_to_legacy: false,
        ..MigrationPolicyConfig::default()
    })
    .unwrap();
    let router = router_with(
        legacy.clone(),
        Arc::new(FailingBackend::unavailable(Backend::Current)),
        policy,
        Arc::new(FixedSampler(0.5)),
    );

    let result = router.enqueue("user-1", "email_digest", serde_json::Value::Null).await;

    assert!(matches!(
        result,
        Err(JobRouterError::Enqueue {
            backend: Backend::Current,
            ..
        })
    ));
    assert!(legacy.is_empty().await);
    assert_eq!(router.get_status().await.failures, 1);
}

#[tokio::test]
async fn test_fallback_failure_surfaces_both_errors() {
    let router = router_with(
        Arc::new(FailingBackend::new(
            Backend::Legacy,
            BackendError::Timeout { timeout_ms: 200 },
        )),
        Arc::new(FailingBackend::unavailable(Backend::Current)),
        policy(MigrationMode::Immediate),
        Arc::new(FixedSampler(0.5)),
    );

    match router.enqueue("user-1", "email_digest", serde_json::Value::Null).await {
        Err(JobRouterError::FallbackFailed { primary, fallback }) => {
            assert!(matches!(primary, BackendError::Unavailable(_)));
            assert_eq!(fallback, BackendError::Timeout { timeout_ms: 200 });
        }
        other => panic!("expected FallbackFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_legacy_failure_is_not_retried() {
    let legacy = Arc::new(FailingBackend::unavailable(Backend::Legacy));
    let router = router_with(
        legacy.clone(),
        Arc::new(InMemoryJobBackend::new(Backend::Current)),
        policy(MigrationMode::Gradual),
        Arc::new(FixedSampler(0.5)),
    );

    let result = router.enqueue("user-1", "price_refresh", serde_json::Value::Null).await;

    assert!(matches!(
        result,
        Err(JobRouterError::Enqueue {
            backend: Backend::Legacy,
            ..
        })
    ));
    assert_eq!(legacy.calls(), 1);
}

// ============================================================================
// Migration
// ============================================================================

#[tokio::test]
async fn test_migrate_moves_only_eligible_jobs() {
    let (router, legacy, current) = memory_router(MigrationMode::Gradual);

    let low = legacy_job(JobPriority::Low);
    let medium = legacy_job(JobPriority::Medium);
    let critical = legacy_job(JobPriority::Critical);
    for job in [&low, &medium, &critical] {
        legacy.enqueue(job.clone()).await.unwrap();
    }

    let report = router.migrate_existing_jobs().await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.migrated, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(legacy.list().await.unwrap(), vec![critical]);

    let moved = current.list().await.unwrap();
    assert_eq!(moved.len(), 2);
    // Dispatch order puts medium ahead of low
    assert_eq!(moved[0].migrated_from.as_deref(), Some(medium.id.as_str()));
    assert_eq!(moved[1].migrated_from.as_deref(), Some(low.id.as_str()));
    for job in &moved {
        assert!(job.id.starts_with("job_"));
        assert_eq!(job.payload, low.payload);
        assert_eq!(job.target_backend, Backend::Current);
    }

    let stats = router.get_migration_stats().await.unwrap();
    assert_eq!(stats.total_jobs, 3);
    assert!((stats.migration_percentage - 200.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_migrate_same_priority_follows_schedule_time() {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let current = Arc::new(RecordingBackend::new(Backend::Current));
    let router = router_with(
        legacy.clone(),
        current.clone(),
        policy(MigrationMode::Gradual),
        Arc::new(FixedSampler(0.5)),
    );

    let mut later = legacy_job(JobPriority::Low);
    later.scheduled_at += chrono::Duration::seconds(90);
    let earlier = legacy_job(JobPriority::Low);
    // Enqueued latest-first so insertion order disagrees with schedule order
    legacy.enqueue(later.clone()).await.unwrap();
    legacy.enqueue(earlier.clone()).await.unwrap();

    let report = router.migrate_existing_jobs().await.unwrap();
    assert_eq!(report.migrated, 2);
    assert!(legacy.is_empty().await);

    let arrivals: Vec<Option<String>> = current
        .enqueued()
        .into_iter()
        .map(|job| job.migrated_from)
        .collect();
    assert_eq!(arrivals, vec![Some(earlier.id.clone()), Some(later.id.clone())]);

    let moved = current.list().await.unwrap();
    assert_eq!(moved[0].scheduled_at, earlier.scheduled_at);
    assert_eq!(moved[1].scheduled_at, later.scheduled_at);
}

#[tokio::test]
async fn test_migrate_withdraws_copy_when_legacy_delete_fails() {
    let legacy = Arc::new(UndeletableBackend::new(Backend::Legacy));
    let current = Arc::new(InMemoryJobBackend::new(Backend::Current));
    let router = router_with(
        legacy.clone(),
        current.clone(),
        policy(MigrationMode::Gradual),
        Arc::new(FixedSampler(0.5)),
    );

    legacy.enqueue(legacy_job(JobPriority::Low)).await.unwrap();
    legacy.enqueue(legacy_job(JobPriority::Medium)).await.unwrap();

    let report = router.migrate_existing_jobs().await.unwrap();

    assert_eq!(report.migrated, 0);
    assert_eq!(report.failed, 2);
    assert!(current.is_empty().await);
    assert_eq!(legacy.inner.len().await, 2);
}

#[tokio::test]
async fn test_migrate_keeps_legacy_job_when_copy_fails() {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let router = router_with(
        legacy.clone(),
        Arc::new(FailingBackend::unavailable(Backend::Current)),
        policy(MigrationMode::Gradual),
        Arc::new(FixedSampler(0.5)),
    );

    legacy.enqueue(legacy_job(JobPriority::Low)).await.unwrap();

    let report = router.migrate_existing_jobs().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(legacy.len().await, 1);
}

#[tokio::test]
async fn test_migrate_skips_everything_when_current_disabled() {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let current = Arc::new(InMemoryJobBackend::new(Backend::Current));
    let policy = MigrationPolicy::from_config(&MigrationPolicyConfig {
        enable_current_backend: false,
        ..MigrationPolicyConfig::default()
    })
    .unwrap();
    let router = router_with(legacy.clone(), current.clone(), policy, Arc::new(FixedSampler(0.0)));

    legacy.enqueue(legacy_job(JobPriority::Low)).await.unwrap();
    legacy.enqueue(legacy_job(JobPriority::Low)).await.unwrap();

    let report = router.migrate_existing_jobs().await.unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.migrated, 0);
    assert!(current.is_empty().await);
}

#[tokio::test]
async fn test_concurrent_migration_is_rejected() {
    let router = Arc::new(router_with(
        Arc::new(HangingBackend(Backend::Legacy)),
        Arc::new(InMemoryJobBackend::new(Backend::Current)),
        policy(MigrationMode::Gradual),
        Arc::new(FixedSampler(0.5)),
    ));

    let first = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.migrate_existing_jobs().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = router.migrate_existing_jobs().await;
    assert!(matches!(second, Err(JobRouterError::MigrationInProgress)));

    // The hanging list call times out and surfaces as a backend error
    let first = first.await.unwrap();
    assert!(matches!(
        first,
        Err(JobRouterError::Backend {
            backend: Backend::Legacy,
            source: BackendError::Timeout { .. },
        })
    ));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_uses_id_namespace() {
    let (router, legacy, current) = memory_router(MigrationMode::Gradual);

    let on_current = router.enqueue("u", "email_digest", serde_json::Value::Null).await.unwrap();
    let on_legacy = router.enqueue("u", "price_refresh", serde_json::Value::Null).await.unwrap();

    assert_eq!(router.cancel(&on_current.job_id).await.unwrap(), Backend::Current);
    assert_eq!(router.cancel(&on_legacy.job_id).await.unwrap(), Backend::Legacy);
    assert!(current.is_empty().await);
    assert!(legacy.is_empty().await);
}

#[tokio::test]
async fn test_cancel_falls_back_on_not_found() {
    let (router, _legacy, current) = memory_router(MigrationMode::Gradual);

    // A legacy-namespaced id that actually lives on the current backend
    let mut stray = legacy_job(JobPriority::Low);
    stray.target_backend = Backend::Current;
    current.enqueue(stray.clone()).await.unwrap();

    assert_eq!(router.cancel(&stray.id).await.unwrap(), Backend::Current);
    assert!(matches!(
        router.cancel(&stray.id).await,
        Err(JobRouterError::NotFound(id)) if id == stray.id
    ));
}

#[tokio::test]
async fn test_cancel_does_not_fall_back_on_infra_error() {
    let current = Arc::new(InMemoryJobBackend::new(Backend::Current));
    let router = router_with(
        Arc::new(FailingBackend::unavailable(Backend::Legacy)),
        current.clone(),
        policy(MigrationMode::Gradual),
        Arc::new(FixedSampler(0.5)),
    );

    let mut job = legacy_job(JobPriority::Low);
    job.target_backend = Backend::Current;
    current.enqueue(job.clone()).await.unwrap();

    assert!(matches!(
        router.cancel(&job.id).await,
        Err(JobRouterError::Backend {
            backend: Backend::Legacy,
            ..
        })
    ));
    assert_eq!(current.len().await, 1);
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn test_status_reports_unhealthy_backend() {
    let router = router_with(
        Arc::new(InMemoryJobBackend::new(Backend::Legacy)),
        Arc::new(FailingBackend::unavailable(Backend::Current)),
        policy(MigrationMode::Gradual),
        Arc::new(FixedSampler(0.5)),
    );

    let status = router.get_status().await;
    assert!(status.legacy.healthy);
    assert!(!status.current.healthy);
    assert_eq!(status.mode, MigrationMode::Gradual);
    assert!(router.get_migration_stats().await.is_err());
}

#[tokio::test]
async fn test_migration_stats_empty_is_zero() {
    let (router, _legacy, _current) = memory_router(MigrationMode::Gradual);
    let stats = router.get_migration_stats().await.unwrap();
    assert_eq!(stats.total_jobs, 0);
    assert_eq!(stats.migration_percentage, 0.0);
}
