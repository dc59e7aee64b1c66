//! Background outbox consumer.

use std::{sync::Arc, time::Duration};

use paywire_billing::{
  BillingSettings,
  outbox::{DRAIN_BATCH, drain},
};
use paywire_core::store::PortalStore;
use tracing::{info, warn};

/// Drain due outbox entries of every brand every `period`, forever.
///
/// A full batch is followed straight away by another one.
pub async fn run_outbox<S: PortalStore>(
  store: Arc<S>,
  settings: Arc<BillingSettings>,
  period: Duration,
) {
  info!(?period, "outbox worker started");
  let mut ticker = tokio::time::interval(period);
  loop {
    ticker.tick().await;
    loop {
      match drain(&*store, &settings, None).await {
        Ok(report) => {
          let handled = report.applied + report.retried + report.dead;
          if handled < DRAIN_BATCH as usize {
            break;
          }
        }
        Err(e) => {
          warn!(error = %e, "outbox drain failed");
          break;
        }
      }
    }
  }
}
