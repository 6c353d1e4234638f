//! Request middleware.
//!
//! - [`request_id_layer`] generates a UUID v4 per request and wraps the whole
//!   request lifecycle in a tracing span, so every log line carries the id.
//! - [`validate_params`] runs the route's [`RuleSet`](crate::validation::RuleSet)
//!   against the decoded path and query parameters before the handler.

use std::collections::HashMap;
use std::time::Instant;

use axum::{
    extract::{FromRequestParts, Query, RawPathParams, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Extension type for accessing request ID in handlers if needed.
#[derive(Clone, Debug)]
pub struct RequestId(pub Uuid);

/// Middleware that generates a request ID and creates a request span.
///
/// This should be the outermost middleware layer so the span wraps
/// all request processing, including other middleware and handlers.
pub async fn request_id_layer(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();

    let mut request = request;
    request.extensions_mut().insert(RequestId(request_id));

    async move {
        let response = next.run(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms,
            "Request completed"
        );

        response
    }
    .instrument(span)
    .await
}

/// Validate the matched route's parameters against the keyword rule table.
///
/// Must be installed with `route_layer` so path parameters are already
/// captured. On success the [`ValidatedParams`](crate::validation::ValidatedParams)
/// are inserted into request extensions; on failure the handler never runs.
pub async fn validate_params(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();

    // A route without captures (e.g. "/") yields no path parameters at all;
    // the rule table treats its missing segment as empty.
    let path: HashMap<String, String> = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(raw) => raw
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        Err(rejection) => {
            tracing::debug!(%rejection, "No usable path parameters");
            HashMap::new()
        }
    };

    // Pairs, not a map: a repeated key must reach the rule table intact.
    let Query(query) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
        .map_err(|e| AppError::MalformedQuery(e.body_text()))?;

    let validated = state.keyword_rules.validate(&path, &query)?;

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(validated);
    Ok(next.run(request).await)
}
