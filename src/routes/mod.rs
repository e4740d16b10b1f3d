pub mod auth;
pub mod stripe;
pub mod subscription;

use axum::{
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::responses::JsonResponse;
use crate::state::AppState;

/// Liveness check.
pub async fn health() -> Response {
    JsonResponse::success("ok")
}

/// Every route the service exposes. Rate limiting and CORS are layered on in
/// `main` since they depend on the connection info of a real listener.
pub fn app_router(state: AppState) -> Router {
    let subscription_routes = Router::new()
        .route(
            "/subscribe",
            get(subscription::subscribe_page).post(subscription::subscribe),
        )
        .route(
            "/subscribe/plan/{plan_id}",
            post(subscription::subscribe_to_plan),
        )
        .route("/manage", get(subscription::manage))
        .route("/cancel", post(subscription::cancel))
        .route("/renew", post(subscription::renew))
        .route("/resume", post(subscription::resume))
        .route("/portal", post(subscription::billing_portal));

    Router::new()
        .route("/health", get(health))
        .route("/webhook/stripe", post(stripe::webhook))
        .nest("/subscription", subscription_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
