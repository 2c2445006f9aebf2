use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Json, Router,
};
use persona_ledger::SubscriptionView;
use serde::Deserialize;

use crate::{error::map_json_rejection, params::Caller, ApiError, PersonaState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeBody {
    package_code: String,
}

pub fn router() -> Router<PersonaState> {
    Router::new().route("/", get(current).post(subscribe))
}

/// `null` for a company that never subscribed
async fn current(
    State(state): State<PersonaState>,
    caller: Caller,
) -> Result<Json<Option<SubscriptionView>>, ApiError> {
    let ctx = caller.company_ctx()?;
    Ok(Json(state.engine.ledger().current(&ctx).await?))
}

async fn subscribe(
    State(state): State<PersonaState>,
    caller: Caller,
    body: Result<Json<SubscribeBody>, JsonRejection>,
) -> Result<Json<SubscriptionView>, ApiError> {
    let ctx = caller.company_ctx()?;
    let Json(body) = body.map_err(map_json_rejection)?;

    let view = state.engine.ledger().subscribe_package(&ctx, &body.package_code).await?;
    Ok(Json(view))
}
