//! HTTP API for faucet service

use super::error::FaucetResult;
use super::service::{DispenseRequest, FaucetService, FaucetStatus};
use axum::{
    async_trait,
    extract::{FromRequest, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Dispense request body; field names follow the faucet web form.
#[derive(Debug, Default, Deserialize)]
pub struct DispenseBody {
    #[serde(rename = "rskAddress", alias = "address")]
    pub address: Option<String>,

    #[serde(rename = "captcha", alias = "token")]
    pub captcha: Option<String>,
}

impl From<DispenseBody> for DispenseRequest {
    fn from(body: DispenseBody) -> Self {
        DispenseRequest {
            address: body.address.unwrap_or_default(),
            token: body.captcha,
        }
    }
}

/// Accepts the dispense body as JSON or as an urlencoded form.
pub struct DispensePayload(pub DispenseBody);

#[async_trait]
impl<S> FromRequest<S> for DispensePayload
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.starts_with("application/json"));

        if is_json {
            let Json(body) = Json::<DispenseBody>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self(body))
        } else {
            let Form(body) = Form::<DispenseBody>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self(body))
        }
    }
}

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: String,
}

/// Dispense handler
pub async fn dispense_handler(
    State(service): State<Arc<FaucetService>>,
    DispensePayload(body): DispensePayload,
) -> Response {
    debug!("Dispense request: {:?}", body);

    match service.dispense(body.into()).await {
        Ok(receipt) => (StatusCode::OK, receipt.message()).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Faucet balance in SBTC, as plain text
pub async fn balance_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.balance().await {
        Ok(balance) => (StatusCode::OK, balance).into_response(),
        Err(e) => {
            error!("Balance query failed: {}", e);
            e.into_response()
        }
    }
}

/// Status handler
pub async fn status_handler(
    State(service): State<Arc<FaucetService>>,
) -> FaucetResult<Json<SuccessResponse<FaucetStatus>>> {
    let status = service.get_status().await?;
    Ok(Json(SuccessResponse {
        data: status,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Prometheus exposition
pub async fn metrics_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.render_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Metrics encoding failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Build the faucet router.
pub fn router(service: Arc<FaucetService>, cors_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/", post(dispense_handler))
        .route("/api/dispense", post(dispense_handler))
        .route("/balance", get(balance_handler))
        .route("/api/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(service)
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}
