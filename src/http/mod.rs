//! HTTP server module.
//!
//! Plain HTTP only; TLS terminates at the load balancer. The server includes
//! graceful shutdown on SIGTERM/SIGINT and an explicit control handle.

mod server;
mod shutdown;

pub use server::{HttpServer, ServerConfig, ServerError, ServerHandle};
