//! The `CarrierGateway` trait: the Direct Carrier Billing provider.
//!
//! Implemented by `paywire-dimoco`. Services receive a gateway by generic
//! parameter so tests can substitute a counting fake.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// Ask the provider who the subscriber behind a carrier connection is.
#[derive(Debug, Clone)]
pub struct IdentifyRequest {
  pub ip:         String,
  pub user_agent: Option<String>,
  /// Our own reference for the lookup, echoed in provider logs.
  pub request_id: String,
}

/// A successful identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identified {
  pub msisdn:   String,
  pub operator: Option<String>,
  pub country:  Option<String>,
}

/// Start a one-off charge for an article.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
  /// Our order reference; becomes the provider transaction reference.
  pub order_id:     String,
  pub amount_cents: i64,
  pub currency:     String,
  pub description:  String,
  /// Opaque JSON passed through the provider and echoed in the callback.
  pub metadata:     String,
  /// Where the provider sends the browser after the payment page.
  pub return_url:   String,
  /// Where the provider posts the server-to-server callback.
  pub callback_url: String,
  pub msisdn:       Option<String>,
}

/// The provider's answer to a payment start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
  pub transaction_id: String,
  pub redirect_url:   String,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
  pub transaction_id: String,
  pub amount_cents:   i64,
  pub currency:       String,
  pub reason:         Option<String>,
}

/// Abstraction over a carrier-billing provider.
pub trait CarrierGateway: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Resolve the subscriber on the current carrier connection. `Ok(None)`
  /// means the provider answered but could not identify the subscriber.
  fn identify(
    &self,
    request: IdentifyRequest,
  ) -> impl Future<Output = Result<Option<Identified>, Self::Error>> + Send + '_;

  fn start_payment(
    &self,
    request: PaymentRequest,
  ) -> impl Future<Output = Result<PaymentSession, Self::Error>> + Send + '_;

  fn refund(
    &self,
    request: RefundRequest,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
