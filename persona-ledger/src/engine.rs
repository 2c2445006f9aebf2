use std::sync::Arc;

use crate::{
    admission::AdmissionController,
    backend::LedgerBackend,
    catalog::PackageCatalog,
    config::LedgerConfig,
    ledger::SubscriptionLedger,
    notify::{LogDispatcher, NotificationDispatcher},
    observability::{BoxStream, EventHub},
    test_catalog::TestCatalog,
    types::LedgerEvent,
};

/// Quota engine: the package catalog, the per-company ledger and admission
/// over one shared backend.
///
/// Cheap to clone; clones share the backend and the event hub.
#[derive(Clone)]
pub struct LedgerEngine {
    backend: Arc<dyn LedgerBackend>,
    tests: Arc<dyn TestCatalog>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: Arc<LedgerConfig>,
    events: EventHub,
}

impl LedgerEngine {
    /// Create an engine with the default config and a logging dispatcher
    pub fn new(backend: Arc<dyn LedgerBackend>, tests: Arc<dyn TestCatalog>) -> Self {
        Self {
            backend,
            tests,
            dispatcher: Arc::new(LogDispatcher),
            config: Arc::new(LedgerConfig::default()),
            events: EventHub::default(),
        }
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Replace the invitation transport
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn catalog(&self) -> PackageCatalog<'_> {
        PackageCatalog::new(self.backend.as_ref())
    }

    pub fn ledger(&self) -> SubscriptionLedger<'_> {
        SubscriptionLedger::new(self.backend.as_ref(), &self.config, &self.events)
    }

    pub fn admission(&self) -> AdmissionController<'_> {
        AdmissionController::new(
            self.backend.as_ref(),
            self.tests.as_ref(),
            self.dispatcher.as_ref(),
            &self.config,
            &self.events,
        )
    }

    /// Ledger events from this point on
    pub fn events(&self) -> BoxStream<LedgerEvent> {
        self.events.subscribe()
    }
}
