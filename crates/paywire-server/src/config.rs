//! Server configuration, deserialised from `config.toml` and `PAYWIRE__*`
//! environment variables.

use std::{path::PathBuf, sync::Arc, time::Duration};

use paywire_api::{ApiConfig, BrandConfig};
use paywire_billing::BillingSettings;
use anyhow::bail;
use paywire_core::{
  carrier::{CarrierRange, Classifier},
  msisdn::normalize_msisdn,
};
use paywire_dimoco::DimocoConfig;
use serde::Deserialize;

/// An operator-supplied carrier block, added after the built-in table.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeConfig {
  pub carrier: String,
  pub country: String,
  pub cidr:    String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "defaults::host")]
  pub host:                        String,
  #[serde(default = "defaults::port")]
  pub port:                        u16,
  #[serde(default = "defaults::store_path")]
  pub store_path:                  PathBuf,
  #[serde(default = "defaults::brand")]
  pub default_brand:               String,
  #[serde(default)]
  pub brands:                      Vec<BrandConfig>,
  #[serde(default)]
  pub admin_token_hash:            Option<String>,
  #[serde(default)]
  pub callback_secret:             Option<String>,
  #[serde(default)]
  pub cookie_secure:               bool,
  #[serde(default)]
  pub public_base_url:             Option<String>,
  #[serde(default = "defaults::currency")]
  pub default_currency:            String,
  #[serde(default = "defaults::link_window_minutes")]
  pub session_link_window_minutes: i64,
  #[serde(default = "defaults::outbox_poll_secs")]
  pub outbox_poll_secs:            u64,
  #[serde(default = "defaults::identify_timeout_secs")]
  pub identify_timeout_secs:       u64,
  /// Endpoint of the content generator. Runs fail without it.
  #[serde(default)]
  pub pipeline_url:                Option<String>,
  #[serde(default = "defaults::pipeline_timeout_secs")]
  pub pipeline_timeout_secs:       u64,
  #[serde(default)]
  pub extra_carrier_ranges:        Vec<RangeConfig>,
  #[serde(default)]
  pub dimoco:                      DimocoConfig,
}

mod defaults {
  use std::path::PathBuf;

  pub fn host() -> String { "127.0.0.1".into() }
  pub fn port() -> u16 { 8080 }
  pub fn store_path() -> PathBuf { PathBuf::from("~/.local/share/paywire/paywire.db") }
  pub fn brand() -> String { "default".into() }
  pub fn currency() -> String { "EUR".into() }
  pub fn link_window_minutes() -> i64 { 30 }
  pub fn outbox_poll_secs() -> u64 { 15 }
  pub fn identify_timeout_secs() -> u64 { 5 }
  pub fn pipeline_timeout_secs() -> u64 { 300 }
}

impl ServerConfig {
  pub fn classifier(&self) -> paywire_core::Result<Classifier> {
    let extra = self
      .extra_carrier_ranges
      .iter()
      .map(|r| CarrierRange::parse(&r.carrier, &r.country, &r.cidr))
      .collect::<paywire_core::Result<Vec<_>>>()?;
    Ok(Classifier::with_extra(extra))
  }

  /// Fails when `dimoco.sandbox_msisdn` is set but is not a phone number.
  pub fn billing_settings(&self, classifier: Classifier) -> anyhow::Result<BillingSettings> {
    let raw = self.dimoco.sandbox_msisdn.trim();
    let sandbox_msisdn = if raw.is_empty() {
      None
    } else {
      match normalize_msisdn(raw) {
        Some(m) => Some(m),
        None => bail!("dimoco.sandbox_msisdn {raw:?} is not a valid MSISDN"),
      }
    };

    Ok(BillingSettings {
      classifier: Arc::new(classifier),
      identify_timeout: Duration::from_secs(self.identify_timeout_secs),
      link_window: chrono::Duration::minutes(self.session_link_window_minutes),
      sandbox_msisdn,
      callback_secret: self.callback_secret.clone().filter(|s| !s.is_empty()),
      default_currency: self.default_currency.clone(),
    })
  }

  pub fn api_config(&self) -> ApiConfig {
    ApiConfig {
      default_brand:    self.default_brand.clone(),
      brands:           self.brands.clone(),
      admin_token_hash: self.admin_token_hash.clone().filter(|h| !h.is_empty()),
      cookie_secure:    self.cookie_secure,
      public_base_url:  self.public_base_url.clone(),
    }
  }
}
