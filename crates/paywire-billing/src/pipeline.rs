//! Content-pipeline runs.
//!
//! A run is recorded before it starts, so its id can be handed back to the
//! caller straight away and polled from any instance.

use std::future::Future;

use paywire_core::{
  pipeline::{PipelineRun, RunUpdate},
  store::PortalStore,
};
use tracing::{error, info};
use uuid::Uuid;

use crate::{Error, Result};

/// Something that generates content for a brand and reports a JSON summary.
pub trait ContentPipeline: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run<'a>(
    &'a self,
    brand: &'a str,
  ) -> impl Future<Output = Result<serde_json::Value, Self::Error>> + Send + 'a;
}

pub async fn enqueue_run<S: PortalStore>(store: &S, brand: &str) -> Result<PipelineRun> {
  store.create_pipeline_run(brand).await.map_err(Error::store)
}

/// Drive a queued run to completion and return its final record.
pub async fn execute_run<S, P>(
  store: &S,
  pipeline: &P,
  brand: &str,
  run_id: Uuid,
) -> Result<PipelineRun>
where
  S: PortalStore,
  P: ContentPipeline,
{
  if !store
    .update_pipeline_run(run_id, RunUpdate::Started)
    .await
    .map_err(Error::store)?
  {
    return Err(Error::NotFound(format!("pipeline run {run_id}")));
  }

  let update = match pipeline.run(brand).await {
    Ok(summary) => {
      info!(%run_id, brand, "pipeline run succeeded");
      RunUpdate::Succeeded(summary)
    }
    Err(e) => {
      error!(%run_id, brand, error = %e, "pipeline run failed");
      RunUpdate::Failed(e.to_string())
    }
  };
  store
    .update_pipeline_run(run_id, update)
    .await
    .map_err(Error::store)?;

  run_status(store, brand, run_id).await
}

pub async fn run_status<S: PortalStore>(
  store: &S,
  brand: &str,
  run_id: Uuid,
) -> Result<PipelineRun> {
  store
    .get_pipeline_run(brand, run_id)
    .await
    .map_err(Error::store)?
    .ok_or_else(|| Error::NotFound(format!("pipeline run {run_id}")))
}

pub async fn latest_run<S: PortalStore>(store: &S, brand: &str) -> Result<Option<PipelineRun>> {
  store.latest_pipeline_run(brand).await.map_err(Error::store)
}
