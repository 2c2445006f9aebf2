pub mod config;
pub mod mailer;

use std::{future::Future, sync::Arc};

use anyhow::Result;
use persona_axum::AxumApp;
use persona_ledger::{
    LedgerBackend, LedgerEngine, LedgerError, MemoryBackend, MemoryTestCatalog, NewPackage, TestCatalog,
};
use tracing::{info, warn};

pub use config::ServerConfig;
pub use mailer::WebhookDispatcher;

/// A configured application plus the resources it must release on shutdown
pub struct Server {
    pub app: AxumApp,
    #[cfg(feature = "postgres")]
    pool: Option<sqlx::PgPool>,
}

impl Server {
    /// Serve until `signal` resolves, then close the store
    pub async fn serve<F>(self, addr: String, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(%addr, "persona server listening");
        self.app.listen_with_shutdown(addr, signal).await?;

        #[cfg(feature = "postgres")]
        if let Some(pool) = self.pool {
            pool.close().await;
            info!("database pool closed");
        }
        Ok(())
    }
}

pub async fn build(config: &ServerConfig) -> Result<Server> {
    let (backend, tests, pool) = match &config.database_url {
        Some(url) => connect(url, config).await?,
        None => {
            let tests = MemoryTestCatalog::new();
            for test_id in &config.seed_tests {
                tests.insert_global(test_id.as_str());
            }
            info!(seeded_tests = config.seed_tests.len(), "using in-memory ledger store");
            let backend: Arc<dyn LedgerBackend> = Arc::new(MemoryBackend::new());
            let tests: Arc<dyn TestCatalog> = Arc::new(tests);
            (backend, tests, None)
        }
    };

    let mut engine = LedgerEngine::new(backend, tests).with_config(config.ledger.clone());
    if let Some(url) = &config.mail_webhook_url {
        engine = engine.with_dispatcher(Arc::new(WebhookDispatcher::new(url.clone())));
        info!("invitations go through the mail relay");
    }

    seed_packages(&engine, &config.seed_packages).await?;

    #[cfg(not(feature = "postgres"))]
    drop(pool);

    Ok(Server {
        app: persona_axum::axum(engine),
        #[cfg(feature = "postgres")]
        pool,
    })
}

#[cfg(feature = "postgres")]
type Connected = (Arc<dyn LedgerBackend>, Arc<dyn TestCatalog>, Option<sqlx::PgPool>);

#[cfg(feature = "postgres")]
async fn connect(url: &str, config: &ServerConfig) -> Result<Connected> {
    use persona_ledger::{PgBackend, PgTestCatalog, TestId};
    use sqlx::postgres::PgPoolOptions;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await?;

    let backend = PgBackend::new(pool.clone());
    backend.migrate().await?;

    let tests = PgTestCatalog::new(pool.clone());
    for test_id in &config.seed_tests {
        tests.insert_test(&TestId::from(test_id.as_str()), None).await?;
    }

    info!("using PostgreSQL ledger store");
    Ok((Arc::new(backend), Arc::new(tests), Some(pool)))
}

#[cfg(not(feature = "postgres"))]
async fn connect(
    _url: &str,
    _config: &ServerConfig,
) -> Result<(Arc<dyn LedgerBackend>, Arc<dyn TestCatalog>, Option<()>)> {
    anyhow::bail!("DATABASE_URL is set but persona-server was built without the `postgres` feature")
}

/// Create seed packages that do not exist yet
async fn seed_packages(engine: &LedgerEngine, packages: &[NewPackage]) -> Result<()> {
    for package in packages {
        match engine.catalog().create(package.clone()).await {
            Ok(created) => info!(code = %created.code, "seeded package"),
            Err(LedgerError::DuplicatePackage(code)) => warn!(%code, "seed package already exists"),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
