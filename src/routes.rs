use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    handler::payments::{
        confirm_payment, create_connect_account, generate_confirmation_code, initiate_payment,
        pay_outstanding_fee, payfast_itn, setup_payout_details, stripe_webhook,
    },
    middleware::auth,
    AppState,
};

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Server is running"
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Caller-initiated payment operations (require auth)
    let protected_payment_routes = Router::new()
        .route("/initiate", post(initiate_payment))
        .route("/confirm", post(confirm_payment))
        .route("/pay-fee", post(pay_outstanding_fee))
        .route("/generate-code", post(generate_confirmation_code))
        .route("/connect-account", post(create_connect_account))
        .route("/payout-details", post(setup_payout_details))
        .layer(middleware::from_fn(auth));

    // Gateway-initiated notifications (no auth - signature verification)
    let public_payment_routes = Router::new()
        .route("/webhook/payfast", post(payfast_itn))
        .route("/webhook/stripe", post(stripe_webhook));

    let payment_routes = Router::new()
        .merge(protected_payment_routes)
        .merge(public_payment_routes);

    let api_route = Router::new()
        .route("/healthcheck", get(health_check))
        .nest("/payments", payment_routes)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(app_state));

    Router::new().nest("/api", api_route)
}
