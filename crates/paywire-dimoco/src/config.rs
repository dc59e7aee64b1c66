use serde::Deserialize;

/// Connection settings for the DIMOCO API.
#[derive(Debug, Clone, Deserialize)]
pub struct DimocoConfig {
  #[serde(default = "default_base_url")]
  pub base_url:         String,
  #[serde(default = "default_sandbox_base_url")]
  pub sandbox_base_url: String,
  #[serde(default)]
  pub merchant:         String,
  #[serde(default)]
  pub secret:           String,
  /// Route every call to the sandbox endpoint.
  #[serde(default)]
  pub sandbox:          bool,
  /// The test subscriber the sandbox reports for every payment.
  #[serde(default = "default_sandbox_msisdn")]
  pub sandbox_msisdn:   String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:     u64,
}

fn default_base_url() -> String { "https://services.dimoco.at/smart/payment".into() }
fn default_sandbox_base_url() -> String {
  "https://sandbox-dcb.dimoco.at/sph/payment".into()
}
fn default_sandbox_msisdn() -> String { "436763602302".into() }
fn default_timeout_secs() -> u64 { 5 }

impl Default for DimocoConfig {
  fn default() -> Self {
    Self {
      base_url:         default_base_url(),
      sandbox_base_url: default_sandbox_base_url(),
      merchant:         String::new(),
      secret:           String::new(),
      sandbox:          false,
      sandbox_msisdn:   default_sandbox_msisdn(),
      timeout_secs:     default_timeout_secs(),
    }
  }
}

impl DimocoConfig {
  /// The endpoint every action is posted to.
  pub fn endpoint(&self) -> &str {
    if self.sandbox { &self.sandbox_base_url } else { &self.base_url }
  }
}
