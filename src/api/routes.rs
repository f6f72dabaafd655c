//! HTTP API route definitions.

use std::time::Instant;

use axum::extract::{DefaultBodyLimit, MatchedPath, Request};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::docs::ApiDoc;
use super::handlers::{health, metrics, ready};
use super::properties::MULTIPART_OVERHEAD;
use super::state::AppState;
use super::{admin, auth, leads, properties};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.settings.max_upload_bytes + MULTIPART_OVERHEAD;

    let admin_routes = Router::new()
        .route("/api/v1/admin/stats", get(admin::stats))
        .route("/api/v1/admin/leads", get(admin::list_leads))
        .route("/api/v1/admin/leads/:id", get(admin::get_lead))
        .route("/api/v1/admin/leads/:id/stage", patch(admin::update_stage))
        .route("/api/v1/admin/leads/:id/notes", post(admin::add_note))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    let property_routes = Router::new()
        .route(
            "/api/v1/properties",
            get(properties::list_deals).post(properties::create_deal),
        )
        .route(
            "/api/v1/properties/upload",
            post(properties::upload_document).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/v1/properties/extract",
            post(properties::extract_document),
        )
        .route(
            "/api/v1/properties/:id",
            get(properties::get_deal).put(properties::update_deal),
        );

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        // API
        .route("/api/v1/submit-lead", post(leads::submit_lead))
        .route(
            "/api/v1/admin/auth",
            post(auth::login).delete(auth::logout),
        )
        .merge(admin_routes)
        .merge(property_routes)
        .route_layer(middleware::from_fn(track_metrics))
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.settings.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, ACCEPT])
        .allow_credentials(true)
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let method = request.method().to_string();

    let response = next.run(request).await;
    crate::metrics::record_http_request(start, &method, &path, response.status().as_u16());
    response
}
