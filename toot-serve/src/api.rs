//! HTTP control surface.
//!
//! Four fixed routes:
//! - `POST /post` and `POST /reply` for single-shot publishing
//! - `POST /start_population` and `POST /stop_population` for the mirror

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use libtootfleet::{Fleet, FleetError, PostRequest, PostResponse, ReplyRequest};
use serde::Serialize;
use tower_http::trace::TraceLayer;

/// Successful reply body; the payload fields sit next to `success`
#[derive(Serialize)]
struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct Message {
    message: &'static str,
}

fn ok<T: Serialize>(body: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        body,
    })
}

/// Library error rendered as `{"success": false, "error": ...}`
pub struct ApiError(FleetError);

impl From<FleetError> for ApiError {
    fn from(error: FleetError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(FleetError::InvalidInput(format!(
            "Malformed request body: {}",
            rejection.body_text()
        )))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            FleetError::Scheduler(_) | FleetError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = serde_json::json!({
            "success": false,
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<Success<T>>, ApiError>;

async fn post_status(
    State(fleet): State<Arc<Fleet>>,
    body: Result<Json<PostRequest>, JsonRejection>,
) -> ApiResult<PostResponse> {
    let Json(request) = body?;
    let response = fleet.post(&request).await?;
    Ok(ok(response))
}

async fn reply_status(
    State(fleet): State<Arc<Fleet>>,
    body: Result<Json<ReplyRequest>, JsonRejection>,
) -> ApiResult<PostResponse> {
    let Json(request) = body?;
    let response = fleet.reply(&request).await?;
    Ok(ok(response))
}

async fn start_population(State(fleet): State<Arc<Fleet>>) -> ApiResult<Message> {
    fleet.start_population().await?;
    Ok(ok(Message {
        message: "Population started",
    }))
}

async fn stop_population(State(fleet): State<Arc<Fleet>>) -> ApiResult<Message> {
    fleet.stop_population().await?;
    Ok(ok(Message {
        message: "Population stopped",
    }))
}

/// Build the router with all routes.
pub fn router(fleet: Arc<Fleet>) -> Router {
    Router::new()
        .route("/post", post(post_status))
        .route("/reply", post(reply_status))
        .route("/start_population", post(start_population))
        .route("/stop_population", post(stop_population))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_request(())
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = response.status();
                        if !status.is_success() {
                            tracing::warn!(
                                status = %status,
                                latency_ms = latency.as_millis(),
                                "request failed"
                            );
                        }
                    },
                ),
        )
        .with_state(fleet)
}
