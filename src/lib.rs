//! starter-kit-api: a small HTTP API together with the container topology
//! and delivery pipeline it is deployed with.
//!
//! The service exposes `/status` and `/test` for health probes and a
//! validated keyword echo route. The [`deploy`] module holds the deployment
//! topology as data and the `Source → Build → Deploy` pipeline.

pub mod config;
pub mod deploy;
pub mod error;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod validation;

pub use error::AppError;
