//! DIMOCO carrier-billing client.
//!
//! Implements [`paywire_core::gateway::CarrierGateway`] over DIMOCO's HTTP
//! API: digest-signed form posts answered with small XML documents.

mod client;
mod config;
mod digest;
mod response;

pub mod error;

pub use client::DimocoClient;
pub use config::DimocoConfig;
pub use error::{Error, Result};
