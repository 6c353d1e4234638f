//! Status endpoints for container orchestration.
//!
//! `/status` is the target of both the container health check and the load
//! balancer's target-group probe; `/test` answers identically for smoke tests.
//! Neither inspects the request.

use crate::config::STATUS_BODY;

/// Status handler.
///
/// This is a liveness probe - it only checks that the process can respond to HTTP.
pub async fn status() -> &'static str {
    STATUS_BODY
}

pub async fn test() -> &'static str {
    STATUS_BODY
}
