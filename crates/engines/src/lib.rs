//! Reasoning engine backends for forgeloop.
//!
//! All backends implement the `forgeloop_core::Engine` trait.
//! The router selects an engine for each routing tier.

pub mod http;
pub mod retry;
pub mod router;

pub use http::HttpEngine;
pub use retry::RetryEngine;
pub use router::{EngineRouter, build_from_config};
