//! HTTP route handlers.
//!
//! Status routes carry `Cache-Control: no-store` so probes always reach the
//! process. The keyword route is guarded by the validation middleware, which
//! runs the route's rule table before the handler is invoked.
//!
//! Request tracing is enabled via middleware that generates a unique request ID
//! for each incoming request, allowing correlation of all logs within a request.

pub mod keyword;
pub mod status;

use axum::{middleware, routing::get, Router};
use http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::{CACHE_CONTROL_STATUS, KEYWORD_ROUTE, STATUS_PATH, TEST_PATH};
use crate::middleware::{request_id_layer, validate_params};
use crate::state::AppState;

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let status_routes = Router::new()
        .route(STATUS_PATH, get(status::status))
        .route(TEST_PATH, get(status::test))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_STATUS),
        ));

    let mut router = Router::new().merge(status_routes);

    if state.config.routes.keyword_lookup {
        // "/" is mounted on the same handler so it is validated as an empty
        // keyword rather than treated as a missing route.
        let keyword_routes = Router::new()
            .route("/", get(keyword::echo))
            .route(KEYWORD_ROUTE, get(keyword::echo))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                validate_params,
            ));
        router = router.merge(keyword_routes);
    } else {
        tracing::info!("Keyword route disabled");
    }

    router
        .with_state(state)
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}
