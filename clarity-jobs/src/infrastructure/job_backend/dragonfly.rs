//! Dragonfly-backed job backend
//!
//! Each backend owns two keys under its prefix: a hash of job id to job JSON
//! and a sorted set of job ids scored so that `ZPOPMIN` yields the
//! highest-priority, earliest-scheduled job.
// cspell:ignore Dragonfly ZPOPMIN HVALS

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::{debug, warn};

use clarity_core::config::JobPriority;

use crate::domain::{Backend, BackendError, BackendStats, JobBackend, JobItem};

/// Priority bands are this far apart; larger than any epoch-ms schedule time
/// and small enough that every score stays exact in an f64.
const PRIORITY_BAND: f64 = 1e13;

/// Pop the lowest-scored id and return its job document
const POP_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
  return false
end
local job = redis.call('HGET', KEYS[2], popped[1])
redis.call('HDEL', KEYS[2], popped[1])
return job
"#;

/// Remove one job from both keys, returning 1 if it was queued
const REMOVE_SCRIPT: &str = r#"
local removed = redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
return removed
"#;

pub struct DragonflyJobBackend {
    kind: Backend,
    connection_manager: Arc<ConnectionManager>,
    queue_key: String,
    jobs_key: String,
    pop_script: redis::Script,
    remove_script: redis::Script,
}

impl DragonflyJobBackend {
    /// Connect to Dragonfly and verify the connection with a PING
    pub async fn new(url: &str, key_prefix: &str, kind: Backend) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!("Failed to create Redis client for {} job backend: {}", kind, e);
            BackendError::Unavailable(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            warn!(
                "Failed to create connection manager for {} job backend: {}",
                kind, e
            );
            BackendError::Unavailable(format!("Failed to create connection manager: {}", e))
        })?;

        let mut conn = connection_manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        debug!("Connected {} job backend to Dragonfly", kind);

        Ok(Self {
            kind,
            connection_manager: Arc::new(connection_manager),
            queue_key: queue_key(key_prefix, kind),
            jobs_key: jobs_key(key_prefix, kind),
            pop_script: redis::Script::new(POP_SCRIPT),
            remove_script: redis::Script::new(REMOVE_SCRIPT),
        })
    }

    async fn remove(&self, job_id: &str) -> Result<(), BackendError> {
        let mut conn = (*self.connection_manager).clone();

        let removed: i64 = self
            .remove_script
            .key(&self.queue_key)
            .key(&self.jobs_key)
            .arg(job_id)
            .invoke_async(&mut conn)
            .await?;

        if removed == 0 {
            return Err(BackendError::NotFound(job_id.to_string()));
        }
        Ok(())
    }
}

/// Sorted set of queued job ids
pub fn queue_key(prefix: &str, backend: Backend) -> String {
    format!("{}:{}:queue", prefix, backend.as_str())
}

/// Hash of job id to job document
pub fn jobs_key(prefix: &str, backend: Backend) -> String {
    format!("{}:{}:jobs", prefix, backend.as_str())
}

/// Queue score: lower pops first
pub fn queue_score(job: &JobItem) -> f64 {
    let band = (JobPriority::Critical.rank() - job.priority.rank()) as f64;
    let scheduled_ms = job.scheduled_at.timestamp_millis().max(0) as f64;
    band * PRIORITY_BAND + scheduled_ms
}

#[async_trait]
impl JobBackend for DragonflyJobBackend {
    fn kind(&self) -> Backend {
        self.kind
    }

    async fn enqueue(&self, job: JobItem) -> Result<(), BackendError> {
        let mut conn = (*self.connection_manager).clone();
        let document = serde_json::to_string(&job)?;

        let _: () = redis::pipe()
            .atomic()
            .hset(&self.jobs_key, &job.id, document)
            .ignore()
            .zadd(&self.queue_key, &job.id, queue_score(&job))
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %job.id, backend = %self.kind, "Job stored in Dragonfly");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobItem>, BackendError> {
        let mut conn = (*self.connection_manager).clone();

        let document: Option<String> = self
            .pop_script
            .key(&self.queue_key)
            .key(&self.jobs_key)
            .invoke_async(&mut conn)
            .await?;

        match document {
            Some(document) => Ok(Some(serde_json::from_str(&document)?)),
            None => Ok(None),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), BackendError> {
        self.remove(job_id).await
    }

    async fn delete(&self, job_id: &str) -> Result<(), BackendError> {
        self.remove(job_id).await
    }

    async fn list(&self) -> Result<Vec<JobItem>, BackendError> {
        let mut conn = (*self.connection_manager).clone();

        let documents: Vec<String> = redis::cmd("HVALS")
            .arg(&self.jobs_key)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(documents.len());
        for document in documents {
            match serde_json::from_str::<JobItem>(&document) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(backend = %self.kind, error = %e, "Skipping undecodable job document"),
            }
        }

        jobs.sort_by(|a, b| a.dispatch_order(b));
        Ok(jobs)
    }

    async fn stats(&self) -> Result<BackendStats, BackendError> {
        let mut conn = (*self.connection_manager).clone();

        let queued: u64 = redis::cmd("ZCARD")
            .arg(&self.queue_key)
            .query_async(&mut conn)
            .await?;

        Ok(BackendStats {
            backend: self.kind,
            queued,
            healthy: true,
        })
    }

    async fn health_check(&self) -> bool {
        let mut conn = (*self.connection_manager).clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}
