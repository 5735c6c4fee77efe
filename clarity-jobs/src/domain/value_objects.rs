//! Routing policy value objects

use std::collections::HashMap;

use clarity_core::config::{
    JobPriority, JobsConfig, MigrationMode, MigrationPolicyConfig, Validate, ValidationError,
};

use super::entities::Backend;

/// Validated migration policy.
///
/// Built from [`MigrationPolicyConfig`]; priority names are parsed and
/// invalid mode combinations are rejected here.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPolicy {
    enable_current_backend: bool,
    mode: MigrationMode,
    fallback_to_legacy: bool,
    priority_eligibility: HashMap<JobPriority, bool>,
    testing_sample_rate: f64,
}

impl MigrationPolicy {
    pub fn from_config(config: &MigrationPolicyConfig) -> Result<Self, ValidationError> {
        config.validate()?;

        let mut priority_eligibility = HashMap::new();
        for (name, eligible) in &config.priority_eligibility {
            let priority = JobPriority::parse(name).ok_or_else(|| {
                ValidationError::jobs(format!("Unknown priority in priority_eligibility: {}", name))
            })?;
            priority_eligibility.insert(priority, *eligible);
        }

        Ok(Self {
            enable_current_backend: config.enable_current_backend,
            mode: config.mode,
            fallback_to_legacy: config.fallback_to_legacy,
            priority_eligibility,
            testing_sample_rate: config.testing_sample_rate,
        })
    }

    pub fn enable_current_backend(&self) -> bool {
        self.enable_current_backend
    }

    pub fn mode(&self) -> MigrationMode {
        self.mode
    }

    pub fn fallback_to_legacy(&self) -> bool {
        self.fallback_to_legacy
    }

    pub fn testing_sample_rate(&self) -> f64 {
        self.testing_sample_rate
    }

    /// Whether a job of `priority` may live on the current backend.
    /// Priorities missing from the table are not eligible.
    pub fn is_eligible(&self, priority: JobPriority) -> bool {
        self.enable_current_backend
            && self
                .priority_eligibility
                .get(&priority)
                .copied()
                .unwrap_or(false)
    }

    /// Pick the backend for a new job. `sample` is a draw from `[0, 1)` and is
    /// only consulted in testing mode.
    pub fn route(&self, priority: JobPriority, sample: impl FnOnce() -> f64) -> Backend {
        if !self.enable_current_backend {
            return Backend::Legacy;
        }

        match self.mode {
            MigrationMode::Immediate => Backend::Current,
            MigrationMode::Testing => {
                if sample() < self.testing_sample_rate {
                    Backend::Current
                } else {
                    Backend::Legacy
                }
            }
            MigrationMode::Gradual => {
                if self.is_eligible(priority) {
                    Backend::Current
                } else {
                    Backend::Legacy
                }
            }
        }
    }
}

/// Job type to priority class lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPriorityTable {
    priorities: HashMap<String, JobPriority>,
    default_priority: JobPriority,
}

impl JobPriorityTable {
    pub fn new(priorities: HashMap<String, JobPriority>, default_priority: JobPriority) -> Self {
        Self {
            priorities,
            default_priority,
        }
    }

    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(config.job_priorities.clone(), config.default_priority)
    }

    pub fn priority_of(&self, job_type: &str) -> JobPriority {
        self.priorities
            .get(job_type)
            .copied()
            .unwrap_or(self.default_priority)
    }
}
