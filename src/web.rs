use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::pipeline::{Pipeline, RequestResult, RequestStatus};
use crate::settings::ServerConfig;

impl IntoResponse for RequestResult {
    fn into_response(self) -> Response {
        let status = match self.status {
            RequestStatus::Failure => StatusCode::INTERNAL_SERVER_ERROR,
            RequestStatus::Success | RequestStatus::NoUnreadMessage => StatusCode::OK,
        };
        (status, Json(self)).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "running" }))
}

// The run lives on its own task: once a message is marked seen it must be
// answered even if the client hangs up.
async fn process_email(State(pipeline): State<Arc<Pipeline>>) -> RequestResult {
    let run = tokio::spawn(async move { pipeline.process_next().await });
    match run.await {
        Ok(result) => result,
        Err(e) => {
            error!("Processing task did not complete: {}", e);
            RequestResult::aborted(format!("processing task did not complete: {}", e))
        }
    }
}

pub fn create_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/process-email", post(process_email))
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

pub async fn start_server(router: Router, config: &ServerConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("Server running on http://{}:{}", config.host, config.port);
    axum::serve(listener, router).await?;
    Ok(())
}
