//! Thin outer HTTP surface. Exposes just enough routes
//! to exercise the write-buffered cache, overlay, and phone-verification
//! core end-to-end; this is not a product API surface.

mod error;
mod handlers;

use crate::context::AppContext;
use axum::routing::{get, patch, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the router over a shared `AppContext`.
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/citizens/:cpf", get(handlers::get_citizen_view))
        .route("/citizens/:cpf/fields", patch(handlers::update_field))
        .route("/citizens/:cpf/phone/verify", post(handlers::request_verification))
        .route("/citizens/:cpf/phone/confirm", post(handlers::confirm_verification))
        .route("/phones/:phone/quarantine", post(handlers::quarantine_phone))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
