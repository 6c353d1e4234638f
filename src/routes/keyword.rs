//! Keyword echo handler.

use axum::{response::Json, Extension};
use tracing::instrument;

use crate::config::KEYWORD_PARAM;
use crate::validation::ValidatedParams;

/// Echo the validated path and query parameters back to the caller.
///
/// Only reached after `validate_params` accepted the request.
#[instrument(name = "keyword::echo", skip_all)]
pub async fn echo(Extension(params): Extension<ValidatedParams>) -> Json<ValidatedParams> {
    tracing::debug!(keyword = ?params.params.get(KEYWORD_PARAM), "Echoing validated parameters");
    Json(params)
}
