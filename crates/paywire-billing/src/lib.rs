//! Billing and identity services for paywire.
//!
//! Framework-agnostic: every service takes its collaborators explicitly (a
//! [`paywire_core::store::PortalStore`], a
//! [`paywire_core::gateway::CarrierGateway`], [`BillingSettings`] and the
//! caller's [`RequestContext`]) and never reads ambient request state.

pub mod access;
pub mod callback;
pub mod context;
pub mod detect;
pub mod error;
pub mod outbox;
pub mod payment;
pub mod pipeline;
pub mod refund;
pub mod settings;
pub mod tracking;

pub use context::RequestContext;
pub use error::{Error, Result};
pub use settings::BillingSettings;
