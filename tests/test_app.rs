//! End-to-end tests for application wiring over in-memory backends

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use clarity_core::config::{
    CacheTier, JobBackendKind, JobsConfig, MigrationMode, RateLimitStorageBackend,
};
use clarity_core::infrastructure::CacheSetOptions;
use clarity_core::infrastructure::rate_limiter::RateLimitConfig;
use clarity_governance::workers::{LoggingJobHandler, spawn_startup_migration};
use clarity_governance::{Config, create_app};
use clarity_jobs::JobRouter;
use clarity_jobs::domain::{Backend, JobBackend, JobItem, JobPriority};
use clarity_jobs::infrastructure::{InMemoryJobBackend, SeededSampler};

fn memory_config() -> Config {
    let mut config = Config::default();
    config.rate_limit.storage_backend = RateLimitStorageBackend::Memory;
    config.cache.persistent_enabled = false;
    config.jobs.backend = JobBackendKind::Memory;
    config.jobs.worker_poll_interval_ms = 20;
    config
}

#[tokio::test]
async fn test_app_serves_all_three_services() {
    let app = create_app(memory_config()).await.unwrap();

    let limit = RateLimitConfig::new("user:alice", 1, 60_000).unwrap();
    assert!(app.rate_limiter.check_rate_limit(&limit).await.allowed);
    assert!(!app.rate_limiter.check_rate_limit(&limit).await.allowed);

    let options = CacheSetOptions::untagged(Duration::from_secs(60), CacheTier::Memory).unwrap();
    app.cache.set("dashboard:alice", &42u32, options).await.unwrap();
    assert_eq!(app.cache.get::<u32>("dashboard:alice").await, Some(42));

    let receipt = app
        .job_router
        .enqueue("alice", "email_digest", serde_json::json!({"week": 42}))
        .await
        .unwrap();
    assert_eq!(receipt.backend, Backend::Current);
    assert_eq!(receipt.priority, JobPriority::Low);

    let status = app.status().await;
    assert_eq!(status.mode, MigrationMode::Gradual);
    assert!(status.legacy.healthy && status.current.healthy);
    assert_eq!(status.routed_current, 1);

    app.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_workers_drain_enqueued_jobs() {
    let app = create_app(memory_config()).await.unwrap();

    for job_type in ["price_refresh", "email_digest", "tax_report"] {
        app.job_router
            .enqueue("bob", job_type, serde_json::Value::Null)
            .await
            .unwrap();
    }

    let drained = async {
        loop {
            let stats = app.job_router.get_migration_stats().await.unwrap();
            if stats.total_jobs == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), drained)
        .await
        .expect("workers drain both backends");

    app.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_invalid_migration_config_is_rejected() {
    let mut config = memory_config();
    config.jobs.migration.mode = MigrationMode::Immediate;
    config.jobs.migration.enable_current_backend = false;

    assert!(create_app(config).await.is_err());
}

#[tokio::test]
async fn test_startup_migration_moves_legacy_jobs() {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let current = Arc::new(InMemoryJobBackend::new(Backend::Current));
    for job_type in ["email_digest", "tax_report", "price_refresh"] {
        let priority = match job_type {
            "price_refresh" => JobPriority::Critical,
            "tax_report" => JobPriority::Medium,
            _ => JobPriority::Low,
        };
        let job = JobItem::new(Backend::Legacy, "carol", job_type, serde_json::Value::Null, priority);
        legacy.enqueue(job).await.unwrap();
    }

    let router = Arc::new(
        JobRouter::from_config(
            &JobsConfig::default(),
            legacy.clone(),
            current.clone(),
            Arc::new(SeededSampler::new(Some(7))),
        )
        .unwrap(),
    );

    spawn_startup_migration(Arc::clone(&router), CancellationToken::new())
        .await
        .unwrap();

    // Gradual mode leaves the critical job on legacy
    assert_eq!(legacy.len().await, 1);
    assert_eq!(current.len().await, 2);
}

#[tokio::test]
async fn test_startup_migration_skipped_after_shutdown() {
    let legacy = Arc::new(InMemoryJobBackend::new(Backend::Legacy));
    let current = Arc::new(InMemoryJobBackend::new(Backend::Current));
    legacy
        .enqueue(JobItem::new(
            Backend::Legacy,
            "dave",
            "email_digest",
            serde_json::Value::Null,
            JobPriority::Low,
        ))
        .await
        .unwrap();

    let router = Arc::new(
        JobRouter::from_config(
            &JobsConfig::default(),
            legacy.clone(),
            current.clone(),
            Arc::new(SeededSampler::new(Some(7))),
        )
        .unwrap(),
    );

    let token = CancellationToken::new();
    token.cancel();
    spawn_startup_migration(router, token).await.unwrap();

    assert_eq!(legacy.len().await, 1);
    assert!(current.is_empty().await);
}

#[tokio::test]
async fn test_logging_handler_completes_jobs() {
    use clarity_jobs::application::JobHandler;

    let job = JobItem::new(
        Backend::Current,
        "erin",
        "portfolio_sync",
        serde_json::Value::Null,
        JobPriority::High,
    );
    assert!(LoggingJobHandler.handle(&job).await.is_ok());
}
