use axum::{Json, Router, http::Method, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::alerting::WebhookIngestor;
use crate::server::config::ServerConfig;
use crate::services::{AdjustRuleService, BandwidthConfigService};
use crate::web::routes::{adjust_routes, webhook_routes};

pub use error::AppError;

pub mod error;
pub mod models;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub rule_service: Arc<AdjustRuleService>,
    pub ingestor: Arc<WebhookIngestor>,
    pub bandwidth_service: Arc<BandwidthConfigService>,
    pub config: Arc<ServerConfig>,
}

async fn health_check_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest(
            "/api/adjust",
            adjust_routes::create_adjust_router().merge(webhook_routes::create_webhook_router()),
        )
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
