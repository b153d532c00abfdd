use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{JobPriority, JobStatus};

/// Optional filters for listing jobs. Results are ordered newest-first
/// with id as the tiebreak so pagination stays stable.
#[derive(Debug, Clone, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub priority: Option<JobPriority>,
    pub engine_name: Option<String>,
    pub language: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            status: None,
            priority: None,
            engine_name: None,
            language: None,
            created_after: None,
            created_before: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl JobQuery {
    pub fn normalized(mut self) -> Self {
        if self.limit == 0 {
            self.limit = default_limit();
        }
        self.limit = self.limit.min(500);
        self
    }
}
