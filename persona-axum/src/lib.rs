//! persona-axum: Axum adapter for the Persona quota ledger.
//!
//! Exposes the package catalog, the company subscription and assignment
//! admission as a JSON REST surface. Caller identity arrives as headers set
//! by the upstream auth layer.

pub mod app;
pub mod params;
pub mod rest;
pub mod state;
mod error;
pub use error::{ApiError, ErrorKind};
pub use state::PersonaState;

pub use app::{axum, AxumApp};
