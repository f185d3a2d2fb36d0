//! servex-daemon library crate.
//!
//! Exposes the router, shared state and request/response types so scenario
//! tests can drive the HTTP surface in-process without binding a socket.
//!
//! Order workflow orchestration (placement, payment confirmation, status
//! changes, cleanup) lives in [`workflow`]; handlers in [`routes`] only
//! decode requests, check access and shape responses.

pub mod api_types;
pub mod auth;
pub mod error;
pub mod qr;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod workflow;
