//! Upload and analysis endpoints

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::analysis::FinalizeRequest;
use crate::constants::server::REPORT_CONTENT_TYPE;
use crate::server::auth::MaybeUser;
use crate::server::error::ApiResult;
use crate::server::state::AppState;
use crate::types::{ChunkUpload, GuanxinError, SessionId};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub session_id: SessionId,
    #[serde(default)]
    pub previous_report_content: Option<String>,
    /// Compare against the caller's latest saved report
    #[serde(default)]
    pub compare_with_latest: bool,
}

/// `POST /api/analyze/upload`
pub async fn upload(
    State(state): State<AppState>,
    payload: Result<Json<ChunkUpload>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(chunk) = payload?;
    state.receiver.receive(&chunk).await?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /api/analyze/execute`
///
/// Streams the report as `text/plain` once generation has started. Errors
/// before that point are ordinary JSON errors.
#[instrument(skip_all)]
pub async fn execute(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;

    let mut previous_report = request
        .previous_report_content
        .filter(|p| !p.trim().is_empty());

    if previous_report.is_none() && request.compare_with_latest {
        let user = user.ok_or(GuanxinError::Unauthorized)?;
        previous_report = state
            .journal
            .latest_report(&user)
            .await?
            .map(|report| report.content);
        info!(
            "Comparing with latest saved report: {}",
            if previous_report.is_some() { "found" } else { "none" }
        );
    }

    let stream = state
        .orchestrator
        .finalize(FinalizeRequest {
            session_id: request.session_id,
            previous_report,
        })
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, REPORT_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
