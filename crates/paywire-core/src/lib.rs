//! Core types and trait definitions for the paywire carrier-billing backend.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the pure building blocks (carrier IP classification, MSISDN extraction,
//! callback signatures) plus the [`store::PortalStore`] and
//! [`gateway::CarrierGateway`] abstractions every other crate depends on.

pub mod article;
pub mod carrier;
pub mod customer;
pub mod device;
pub mod error;
pub mod gateway;
pub mod money;
pub mod msisdn;
pub mod outbox;
pub mod pipeline;
pub mod session;
pub mod signature;
pub mod store;
pub mod unlock;

pub use error::{Error, Result};
