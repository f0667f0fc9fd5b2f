//! HTTP API: routing, authentication and error mapping over the
//! authorization kernel.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
