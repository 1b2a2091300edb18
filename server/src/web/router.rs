use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{delete, get, patch, post};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use super::app_state::AppState;
use super::{rest_api, ws_handler};

/// Body limit for REST calls. Images travel over the socket, not here.
const MAX_REQUEST_BODY: usize = 64 * 1024;

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Restrict CORS to the configured public_url origin (or allow any for localhost dev)
    let public_url = &state.hub.config().server.public_url;
    let cors = if public_url.contains("localhost") || public_url.contains("127.0.0.1") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = public_url
            .parse::<HeaderValue>()
            .unwrap_or_else(|_| HeaderValue::from_static("https://localhost"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let api_routes = Router::new()
        .route("/api/health", get(rest_api::health))
        .route("/api/notifications", get(rest_api::list_notifications))
        .route(
            "/api/notifications/read-all",
            patch(rest_api::mark_all_notifications_read),
        )
        .route(
            "/api/notifications/{id}/read",
            patch(rest_api::mark_notification_read),
        )
        .route(
            "/api/notifications/user/{user_id}",
            delete(rest_api::clear_notifications),
        )
        .route("/api/messages/{id}", delete(rest_api::delete_message))
        .route(
            "/api/messages/{id}/reactions",
            post(rest_api::add_reaction).delete(rest_api::remove_reaction),
        )
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY));

    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .merge(api_routes)
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}
