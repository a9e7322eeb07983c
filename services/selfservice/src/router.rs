use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use tessera_core::health::{healthz, readiness};
use tessera_core::middleware::{propagate_request_id_layer, request_id_layer};

use crate::handlers::flow::{
    create_api_flow, create_browser_flow, get_flow, open_link, submit_flow,
};
use crate::state::AppState;

async fn readyz(State(state): State<AppState>) -> StatusCode {
    readiness(state.db.ping().await)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Flows
        .route("/self-service/{kind}/api", post(create_api_flow))
        .route("/self-service/{kind}/browser", get(create_browser_flow))
        .route("/self-service/{kind}/flows", get(get_flow))
        .route("/self-service/{kind}", post(submit_flow).get(open_link))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id_layer())
        .layer(request_id_layer())
}
