use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use persona_ledger::{Admission, AdmitRequest, AssignmentId, AssignmentView, NotificationReport, Page};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::map_json_rejection,
    params::{AssignmentListParams, Caller},
    ApiError, PersonaState,
};

#[derive(Debug, Default, Deserialize)]
struct NotifyBody {
    #[serde(default)]
    note: Option<String>,
}

pub fn router() -> Router<PersonaState> {
    Router::new()
        .route("/", get(list).post(admit))
        .route("/{id}", get(get_one))
        .route("/{id}/notify", post(notify))
}

async fn list(
    State(state): State<PersonaState>,
    caller: Caller,
    query: Result<Query<AssignmentListParams>, QueryRejection>,
) -> Result<Json<Page<AssignmentView>>, ApiError> {
    let ctx = caller.company_ctx()?;
    let Query(params) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let status = params.status()?;

    let page = state
        .engine
        .admission()
        .list_assignments(&ctx, params.page, params.limit, status)
        .await?;
    Ok(Json(page))
}

async fn admit(
    State(state): State<PersonaState>,
    caller: Caller,
    body: Result<Json<AdmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Admission>), ApiError> {
    let ctx = caller.company_ctx()?;
    let Json(request) = body.map_err(map_json_rejection)?;

    let admission = state.engine.admission().admit(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(admission)))
}

async fn get_one(
    State(state): State<PersonaState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<AssignmentView>, ApiError> {
    let ctx = caller.company_ctx()?;
    let view = state
        .engine
        .admission()
        .get_assignment(&ctx, &AssignmentId::from(id))
        .await?;
    Ok(Json(view))
}

/// Body is optional: an empty request re-sends without a note
async fn notify(
    State(state): State<PersonaState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<NotificationReport>, ApiError> {
    let ctx = caller.company_ctx()?;
    let body: NotifyBody = if body.is_empty() {
        NotifyBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::bad_request("Failed to parse the request body as JSON")
                .with_errors(json!({"_schema": [e.to_string()]}))
        })?
    };

    let report = state
        .engine
        .admission()
        .notify(&ctx, &AssignmentId::from(id), body.note)
        .await?;
    Ok(Json(report))
}
