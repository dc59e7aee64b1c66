//! Content pipeline reached over HTTP.

use std::time::Duration;

use paywire_billing::pipeline::ContentPipeline;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("pipeline_url is not configured")]
  NotConfigured,

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("pipeline answered with status {0}")]
  Status(u16),
}

/// Posts `{"brand": …}` to the generator and returns its JSON summary.
pub struct HttpPipeline {
  client: reqwest::Client,
  url:    Option<String>,
}

impl HttpPipeline {
  /// A run that takes longer than `timeout` fails instead of staying `running`.
  pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, PipelineError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client, url })
  }
}

impl ContentPipeline for HttpPipeline {
  type Error = PipelineError;

  async fn run(&self, brand: &str) -> Result<Value, PipelineError> {
    let url = self.url.as_deref().ok_or(PipelineError::NotConfigured)?;
    let resp = self
      .client
      .post(url)
      .json(&json!({ "brand": brand }))
      .send()
      .await?;

    if !resp.status().is_success() {
      return Err(PipelineError::Status(resp.status().as_u16()));
    }
    Ok(resp.json().await?)
  }
}
