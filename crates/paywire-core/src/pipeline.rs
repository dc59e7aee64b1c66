//! Content-pipeline run records.
//!
//! Each admin "run agents" request becomes a row keyed by run id, so any
//! instance can report on a run started by another and status outlives
//! restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
  Queued,
  Running,
  Succeeded,
  Failed,
}

impl RunStatus {
  pub fn is_finished(self) -> bool { matches!(self, Self::Succeeded | Self::Failed) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
  pub run_id:       Uuid,
  pub brand:        String,
  pub status:       RunStatus,
  pub requested_at: DateTime<Utc>,
  pub started_at:   Option<DateTime<Utc>>,
  pub finished_at:  Option<DateTime<Utc>>,
  pub summary:      Option<serde_json::Value>,
  pub error:        Option<String>,
}

/// A status transition for [`crate::store::PortalStore::update_pipeline_run`].
#[derive(Debug, Clone)]
pub enum RunUpdate {
  Started,
  Succeeded(serde_json::Value),
  Failed(String),
}
