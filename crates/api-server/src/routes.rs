use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use utoipa::OpenApi;

use crate::request_id::RequestId;
use crate::{AppError, AppState};

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PredictRequest {
    /// 15 morphology values followed by 3 stimulus values, raw units.
    pub features: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PredictResponse {
    /// Predicted S/V in physical units.
    pub prediction: f64,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(health, predict),
    components(schemas(StatusResponse, PredictRequest, PredictResponse, ErrorBody)),
    tags(
        (name = "Service", description = "Liveness"),
        (name = "Prediction", description = "Point predictions from the frozen posterior")
    )
)]
pub struct ApiDoc;

/// Liveness check
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service is running", body = StatusResponse)),
    tag = "Service"
)]
pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running".to_string(),
    })
}

/// Predict S/V for one film
#[utoipa::path(
    post,
    path = "/predict",
    request_body = PredictRequest,
    responses(
        (status = 200, description = "Point prediction", body = PredictResponse),
        (status = 422, description = "Wrong feature count or malformed body", body = ErrorBody)
    ),
    tag = "Prediction"
)]
pub async fn predict(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, AppError> {
    let Json(req) = payload.map_err(|rejection| {
        AppError::with_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            anyhow::anyhow!("invalid request body: {}", rejection.body_text()),
        )
    })?;

    let prediction = state.predictor.predict(&req.features)?;
    tracing::debug!(
        request_id = request_id.as_ref().map(|Extension(id)| id.0.as_str()),
        prediction,
        "prediction served"
    );
    Ok(Json(PredictResponse { prediction }))
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
