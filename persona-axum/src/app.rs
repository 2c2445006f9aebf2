use std::future::Future;

use axum::{body::Body, http::Request, Router};
use persona_ledger::LedgerEngine;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info_span;

use crate::{params::REQUEST_ID_HEADER, rest, PersonaState};

#[derive(Clone)]
pub struct AxumApp {
    pub engine: LedgerEngine,
    pub router: Router<()>,
}

impl AxumApp {
    /// REST routes over `engine`, wrapped in request-id and trace middleware
    pub fn new(engine: LedgerEngine) -> Self {
        let state = PersonaState::new(engine.clone());

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                info_span!(
                    "http",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id,
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id());

        Self {
            engine,
            router: rest::router(state).layer(middleware),
        }
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        self.listen_with_shutdown(addr, std::future::pending()).await
    }

    /// Serve until `signal` resolves, letting in-flight requests finish
    pub async fn listen_with_shutdown<A, F>(self, addr: A, signal: F) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await?;
        Ok(())
    }
}

pub fn axum(engine: LedgerEngine) -> AxumApp {
    AxumApp::new(engine)
}
