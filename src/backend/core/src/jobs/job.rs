//! Job descriptors and work-level errors.
//!
//! - **JobId**: identifier of one execution attempt
//! - **JobDescriptor**: what a transport carries for one job
//! - **JobError**: failure raised by a job kind's own logic

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::JobgateError;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque identifier naming one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a new random job ID: 24 lowercase hex characters.
    pub fn new() -> Self {
        let mut hex = Uuid::new_v4().simple().to_string();
        hex.truncate(24);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Descriptor
// ═══════════════════════════════════════════════════════════════════════════════

/// One job as handed to a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Job kind identity; selects the handler
    pub job_kind: String,

    /// Domain arguments for one unit of work
    pub args: Vec<Value>,

    pub id: JobId,

    /// Owner of the dedup record this job collided with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<JobId>,

    /// When set and in the future, the job is held until then
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Stamped by the transport on submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl JobDescriptor {
    pub fn new(job_kind: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            job_kind: job_kind.into(),
            args,
            id: JobId::new(),
            duplicate_of: None,
            scheduled_at: None,
            enqueued_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Whether the job is due strictly after `now`.
    pub fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(false, |at| at > now)
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error raised by a job kind's own work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    /// Optional error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Additional context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            context: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_context(mut self, context: impl Serialize) -> Self {
        self.context = serde_json::to_value(context).ok();
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<JobgateError> for JobError {
    fn from(error: JobgateError) -> Self {
        Self {
            message: error.to_string(),
            code: Some(error.code().to_string()),
            context: None,
        }
    }
}

impl From<anyhow::Error> for JobError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(format!("{:#}", error))
    }
}

/// Result of one unit of work.
pub type JobResult = std::result::Result<(), JobError>;
