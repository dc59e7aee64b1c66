//! MSISDN detection.
//!
//! Evidence is tried strongest first: our own cookie, carrier header
//! enrichment, then the gateway's identify call. Only the first two are free;
//! the gateway is asked only from inside a carrier range.

use paywire_core::{
  carrier::NetworkInfo,
  customer::CustomerTouch,
  gateway::{CarrierGateway, IdentifyRequest},
  msisdn::{extract_msisdn, redact},
  session::{MsisdnConfidence, SessionIdentity},
  store::PortalStore,
};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{BillingSettings, RequestContext};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DetectionSource {
  Cookie,
  Header,
  Identify,
  None,
}

#[derive(Debug, Clone, Serialize)]
pub struct Detection {
  pub msisdn:     Option<String>,
  pub confidence: MsisdnConfidence,
  pub source:     DetectionSource,
  /// The enrichment header the number came from.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub header:     Option<&'static str>,
  pub network:    NetworkInfo,
  /// The caller should (re)issue the `user_msisdn` cookie.
  #[serde(skip)]
  pub set_cookie: bool,
}

impl Detection {
  fn none(network: NetworkInfo) -> Self {
    Self {
      msisdn: None,
      confidence: MsisdnConfidence::None,
      source: DetectionSource::None,
      header: None,
      network,
      set_cookie: false,
    }
  }
}

/// Work out who the visitor is and record what was learned.
///
/// Never fails: gateway and store problems are logged and degrade the result.
pub async fn detect<S, G>(
  store: &S,
  gateway: &G,
  settings: &BillingSettings,
  brand: &str,
  ctx: &RequestContext,
) -> Detection
where
  S: PortalStore,
  G: CarrierGateway,
{
  let network = ctx
    .ip
    .as_deref()
    .map(|ip| settings.classifier.classify(ip))
    .unwrap_or_default();

  let detection = resolve(gateway, settings, ctx, network).await;
  debug!(
    source = %detection.source,
    confidence = %detection.confidence,
    network = %detection.network.network_type,
    "msisdn detection"
  );

  if let Err(e) = store.touch_session(brand, ctx.session_touch(false, false)).await {
    warn!(error = %e, "failed to touch session during detection");
  }
  record(store, brand, ctx, &detection).await;
  detection
}

async fn resolve<G: CarrierGateway>(
  gateway: &G,
  settings: &BillingSettings,
  ctx: &RequestContext,
  network: NetworkInfo,
) -> Detection {
  if let Some(msisdn) = ctx.cookie_msisdn() {
    return Detection {
      msisdn: Some(msisdn),
      confidence: MsisdnConfidence::Confirmed,
      source: DetectionSource::Cookie,
      header: None,
      network,
      set_cookie: false,
    };
  }

  if let Some(found) = extract_msisdn(|name| ctx.header(name)) {
    // Off a carrier network the header is whatever the client chose to send.
    let confirmed = network.is_mobile_network;
    return Detection {
      msisdn: Some(found.msisdn),
      confidence: if confirmed {
        MsisdnConfidence::Confirmed
      } else {
        MsisdnConfidence::Unconfirmed
      },
      source: DetectionSource::Header,
      header: Some(found.header),
      network,
      set_cookie: confirmed,
    };
  }

  let ip = match ctx.ip.as_deref() {
    Some(ip) if network.is_mobile_network => ip,
    _ => return Detection::none(network),
  };

  let request = IdentifyRequest {
    ip:         ip.to_string(),
    user_agent: ctx.user_agent.clone(),
    request_id: Uuid::new_v4().to_string(),
  };
  match tokio::time::timeout(settings.identify_timeout, gateway.identify(request)).await {
    Ok(Ok(Some(who))) => Detection {
      msisdn: Some(who.msisdn),
      confidence: MsisdnConfidence::Confirmed,
      source: DetectionSource::Identify,
      header: None,
      network: NetworkInfo {
        carrier: network.carrier.clone().or(who.operator),
        country: network.country.clone().or(who.country),
        ..network
      },
      set_cookie: true,
    },
    Ok(Ok(None)) => {
      debug!("gateway could not identify subscriber");
      Detection::none(network)
    }
    Ok(Err(e)) => {
      warn!(error = %e, "gateway identify failed");
      Detection::none(network)
    }
    Err(_) => {
      warn!(timeout = ?settings.identify_timeout, "gateway identify timed out");
      Detection::none(network)
    }
  }
}

async fn record<S: PortalStore>(
  store: &S,
  brand: &str,
  ctx: &RequestContext,
  detection: &Detection,
) {
  let Some(msisdn) = detection.msisdn.as_deref() else {
    return;
  };

  let identity = SessionIdentity {
    msisdn:       msisdn.to_string(),
    confidence:   detection.confidence,
    network_type: detection.network.network_type,
    carrier:      detection.network.carrier.clone(),
    country:      detection.network.country.clone(),
  };
  if let Err(e) = store.identify_session(brand, &ctx.session_id, identity).await {
    warn!(error = %e, "failed to annotate session");
  }

  if detection.confidence != MsisdnConfidence::Confirmed {
    return;
  }

  let touch = CustomerTouch {
    msisdn:       msisdn.to_string(),
    ip:           ctx.ip.clone(),
    landing_page: ctx.landing_page.clone(),
    utm:          ctx.utm.clone(),
    carrier:      detection.network.carrier.clone(),
    country:      detection.network.country.clone(),
  };
  if let Err(e) = store.upsert_customer(brand, touch).await {
    warn!(error = %e, msisdn = %redact(msisdn), "failed to upsert customer");
  }

  match store.backfill_event_msisdn(brand, &ctx.session_id, msisdn).await {
    Ok(n) if n > 0 => debug!(events = n, "backfilled msisdn onto session events"),
    Ok(_) => {}
    Err(e) => warn!(error = %e, "failed to backfill session events"),
  }
}
