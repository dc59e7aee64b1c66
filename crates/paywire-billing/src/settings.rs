use std::{sync::Arc, time::Duration};

use paywire_core::{carrier::Classifier, msisdn::normalize_msisdn};

/// Tunables shared by the billing services.
#[derive(Debug, Clone)]
pub struct BillingSettings {
  pub classifier:       Arc<Classifier>,
  /// Upper bound on one gateway identify call.
  pub identify_timeout: Duration,
  /// How far back a payment links anonymous sessions from the payer's IP.
  pub link_window:      chrono::Duration,
  /// The gateway's shared test subscriber, if any.
  pub sandbox_msisdn:   Option<String>,
  /// Key for callback signatures. Signed callbacks are refused without it.
  pub callback_secret:  Option<String>,
  /// Used when neither the callback nor the article names a currency.
  pub default_currency: String,
}

impl Default for BillingSettings {
  fn default() -> Self {
    Self {
      classifier:       Arc::new(Classifier::builtin()),
      identify_timeout: Duration::from_secs(5),
      link_window:      chrono::Duration::minutes(30),
      sandbox_msisdn:   Some("436763602302".into()),
      callback_secret:  None,
      default_currency: "EUR".into(),
    }
  }
}

impl BillingSettings {
  /// Compares normalised forms, so `+43…`, `0043…` and `43…` all match.
  pub fn is_sandbox_msisdn(&self, msisdn: &str) -> bool {
    let Some(sandbox) = self.sandbox_msisdn.as_deref().and_then(normalize_msisdn) else {
      return false;
    };
    normalize_msisdn(msisdn).is_some_and(|m| m == sandbox)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sandbox_match_ignores_number_formatting() {
    for configured in ["436763602302", "+436763602302", "00436763602302", "+43 676 3602302"] {
      let settings =
        BillingSettings { sandbox_msisdn: Some(configured.into()), ..Default::default() };
      assert!(settings.is_sandbox_msisdn("436763602302"), "{configured}");
      assert!(settings.is_sandbox_msisdn("+436763602302"), "{configured}");
      assert!(!settings.is_sandbox_msisdn("436601234567"), "{configured}");
    }

    let none = BillingSettings { sandbox_msisdn: None, ..Default::default() };
    assert!(!none.is_sandbox_msisdn("436763602302"));
  }
}
