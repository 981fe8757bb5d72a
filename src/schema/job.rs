use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::style::LogoStyle;

/// Prompt length cap enforced by the input surface.
pub const MAX_PROMPT_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

/// One logo-generation request as it lives in the remote store.
///
/// The id is assigned by the store at creation and never changes; `status`
/// is written exclusively by the backend worker and moves exactly once from
/// `Processing` to a terminal value. `logo_url` carries meaning only while
/// `status == Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub owner_id: String,
    pub prompt: String,
    pub style: LogoStyle,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// What the user hands to `submit`: prompt text plus a style tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub prompt: String,
    pub style: LogoStyle,
}

impl JobRequest {
    /// Builds a request, truncating the prompt at the input cap. The cap is
    /// a UI constraint, so truncation happens here rather than failing the
    /// submission downstream.
    pub fn new(prompt: impl Into<String>, style: LogoStyle) -> Self {
        let mut prompt: String = prompt.into();
        if prompt.chars().count() > MAX_PROMPT_LEN {
            prompt = prompt.chars().take(MAX_PROMPT_LEN).collect();
        }
        Self { prompt, style }
    }
}
