//! First-party visitor tracking.

use paywire_core::{
  session::{EventKind, MsisdnConfidence, NewTrackingEvent, TrackingEvent, VisitorSession},
  store::PortalStore,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, RequestContext, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct TrackInput {
  #[serde(alias = "type")]
  pub kind:       EventKind,
  #[serde(default, alias = "articleId")]
  pub article_id: Option<String>,
  #[serde(default)]
  pub path:       Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tracked {
  pub session: VisitorSession,
  pub event:   TrackingEvent,
}

/// Record one event against the visitor's session, creating the session if
/// this is its first touch. Events carry the session's MSISDN once it is
/// confirmed.
pub async fn track<S: PortalStore>(
  store: &S,
  brand: &str,
  ctx: &RequestContext,
  input: TrackInput,
) -> Result<Tracked> {
  let page_view = input.kind == EventKind::PageView;
  let session = store
    .touch_session(brand, ctx.session_touch(page_view, true))
    .await
    .map_err(Error::store)?;

  let msisdn = (session.msisdn_confidence == MsisdnConfidence::Confirmed)
    .then(|| session.msisdn.clone())
    .flatten();
  let event = store
    .record_event(brand, NewTrackingEvent {
      session_id: session.session_id.clone(),
      kind: input.kind,
      article_id: input.article_id.clone(),
      path: input.path.or_else(|| ctx.landing_page.clone()),
      msisdn,
    })
    .await
    .map_err(Error::store)?;

  if let Some(article_id) = input.article_id.as_deref().filter(|_| page_view) {
    if let Err(e) = store.adjust_article_counters(brand, article_id, 1, 0).await {
      warn!(error = %e, article_id, "failed to count article view");
    }
  }

  Ok(Tracked { session, event })
}
