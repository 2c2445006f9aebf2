use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use persona_ledger::{NewPackage, Package, PackageId, PackagePatch};

use crate::{
    error::map_json_rejection,
    params::{Caller, CallerRole, PackageListParams},
    ApiError, PersonaState,
};

pub fn router() -> Router<PersonaState> {
    // One segment name for both lookups: reads go by code, admin writes by id
    Router::new()
        .route("/", get(list).post(create))
        .route("/{package}", get(get_by_code).patch(update).delete(remove))
        .route("/{package}/deactivate", post(deactivate))
}

async fn list(
    State(state): State<PersonaState>,
    caller: Caller,
    query: Result<Query<PackageListParams>, QueryRejection>,
) -> Result<Json<Vec<Package>>, ApiError> {
    let Query(params) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let include_inactive = params.include_inactive && caller.role == CallerRole::Admin;

    let packages = state.engine.catalog().list(include_inactive).await?;
    Ok(Json(packages))
}

async fn create(
    State(state): State<PersonaState>,
    caller: Caller,
    body: Result<Json<NewPackage>, JsonRejection>,
) -> Result<(StatusCode, Json<Package>), ApiError> {
    caller.require_admin()?;
    let Json(input) = body.map_err(map_json_rejection)?;

    let package = state.engine.catalog().create(input).await?;
    Ok((StatusCode::CREATED, Json(package)))
}

async fn get_by_code(
    State(state): State<PersonaState>,
    Path(code): Path<String>,
) -> Result<Json<Package>, ApiError> {
    Ok(Json(state.engine.catalog().get_by_code(&code).await?))
}

async fn update(
    State(state): State<PersonaState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Result<Json<PackagePatch>, JsonRejection>,
) -> Result<Json<Package>, ApiError> {
    caller.require_admin()?;
    let Json(patch) = body.map_err(map_json_rejection)?;

    let package = state.engine.catalog().update(&PackageId::from(id), patch).await?;
    Ok(Json(package))
}

async fn deactivate(
    State(state): State<PersonaState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Package>, ApiError> {
    caller.require_admin()?;
    Ok(Json(state.engine.catalog().deactivate(&PackageId::from(id)).await?))
}

async fn remove(
    State(state): State<PersonaState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    caller.require_admin()?;
    state.engine.catalog().delete(&PackageId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
