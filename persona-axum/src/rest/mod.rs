pub mod assignments;
pub mod packages;
pub mod subscription;

use axum::{routing::get, Router};

use crate::PersonaState;

/// All REST routes, state applied
pub fn router(state: PersonaState) -> Router<()> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/packages", packages::router())
        .nest("/subscription", subscription::router())
        .nest("/assignments", assignments::router())
        .with_state(state)
}
