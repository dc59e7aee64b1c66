//! Articles. Counters are maintained independently of the billing model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
  /// URL slug; unique per brand.
  pub article_id:   String,
  pub brand:        String,
  pub title:        String,
  pub teaser:       String,
  pub body:         String,
  pub price_cents:  i64,
  pub currency:     String,
  pub unlock_count: i64,
  pub view_count:   i64,
  pub published_at: DateTime<Utc>,
}

/// Input to [`crate::store::PortalStore::create_article`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewArticle {
  pub article_id:   String,
  pub title:        String,
  pub teaser:       String,
  pub body:         String,
  pub price_cents:  i64,
  pub currency:     String,
  pub published_at: Option<DateTime<Utc>>,
}
