//! aoe-gateway - one request/response contract over several LLM providers
//!
//! The [`proxy`] module holds the streaming core; [`providers`] are thin
//! adapters on top of it and [`server`] exposes them over HTTP.

pub mod config;
pub mod error;
pub mod providers;
pub mod proxy;
pub mod server;

pub use error::GatewayError;
