//! Job routing domain entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use clarity_core::config::JobPriority;

/// Which of the two job stores owns a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Durable legacy job table
    Legacy,
    /// Current priority-queue backend
    Current,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Legacy, Backend::Current];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Legacy => "legacy",
            Backend::Current => "current",
        }
    }

    /// Prefix of every job id minted for this backend
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Backend::Legacy => "legacy_",
            Backend::Current => "job_",
        }
    }

    pub fn other(&self) -> Backend {
        match self {
            Backend::Legacy => Backend::Current,
            Backend::Current => Backend::Legacy,
        }
    }

    /// Backend that likely owns `job_id` by its namespace; `None` for foreign ids
    pub fn owner_of(job_id: &str) -> Option<Backend> {
        Backend::ALL
            .into_iter()
            .find(|backend| job_id.starts_with(backend.id_prefix()))
    }

    pub fn mint_id(&self) -> String {
        format!("{}{}", self.id_prefix(), Uuid::new_v4().simple())
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of background work parked in one of the backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItem {
    pub id: String,
    pub job_type: String,
    pub user_id: String,
    /// Opaque job metadata, carried unchanged across migration
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub attempts: u32,
    pub target_backend: Backend,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Id of the legacy job this one was migrated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_from: Option<String>,
}

impl JobItem {
    pub fn new(
        backend: Backend,
        user_id: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        priority: JobPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: backend.mint_id(),
            job_type: job_type.into(),
            user_id: user_id.into(),
            payload,
            priority,
            attempts: 0,
            target_backend: backend,
            scheduled_at: now,
            created_at: now,
            migrated_from: None,
        }
    }

    /// Copy of this job re-homed on `backend` under a fresh id, keeping its
    /// metadata, attempts and schedule and pointing back at the source job.
    pub fn migrated_to(&self, backend: Backend) -> Self {
        Self {
            id: backend.mint_id(),
            target_backend: backend,
            migrated_from: Some(self.id.clone()),
            ..self.clone()
        }
    }

    /// Same job under a fresh id owned by `backend`, without a back-reference
    pub fn reassigned_to(&self, backend: Backend) -> Self {
        Self {
            id: backend.mint_id(),
            target_backend: backend,
            ..self.clone()
        }
    }

    /// Same job re-queued for another attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            attempts: self.attempts + 1,
            scheduled_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Dispatch order: higher priority first, then earlier schedule
    pub fn dispatch_order(&self, other: &JobItem) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.scheduled_at.cmp(&other.scheduled_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Queue depth and health of one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub backend: Backend,
    pub queued: u64,
    pub healthy: bool,
}
