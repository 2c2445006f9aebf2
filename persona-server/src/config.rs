use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use persona_ledger::{LedgerConfig, NewPackage};

/// Runtime settings read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// PostgreSQL connection string; the in-memory store is used without one
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Mail relay endpoint; invitations are only logged without one
    pub mail_webhook_url: Option<String>,
    pub ledger: LedgerConfig,
    pub seed_packages: Vec<NewPackage>,
    pub seed_tests: Vec<String>,
}

impl ServerConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Missing keys take defaults; malformed values fail.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = LedgerConfig::default();
        let ledger = LedgerConfig {
            max_attempts: parse(&get, "LEDGER_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            admit_timeout: parse(&get, "LEDGER_ADMIT_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.admit_timeout),
            notify_timeout: parse(&get, "LEDGER_NOTIFY_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.notify_timeout),
            access_link_base: get("APP_BASE_URL").unwrap_or(defaults.access_link_base.clone()),
            ..defaults
        };

        Ok(Self {
            host: get("HTTP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse(&get, "HTTP_PORT")?.unwrap_or(3030),
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS")?.unwrap_or(10),
            mail_webhook_url: get("MAIL_WEBHOOK_URL"),
            ledger,
            seed_packages: get("SEED_PACKAGES")
                .map(|raw| parse_seed_packages(&raw))
                .transpose()?
                .unwrap_or_default(),
            seed_tests: get("SEED_TESTS")
                .map(|raw| split_list(&raw).map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid {key}: {raw:?}")))
        .transpose()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// `code:allowance[:price_cents]`, comma separated
fn parse_seed_packages(raw: &str) -> Result<Vec<NewPackage>> {
    split_list(raw)
        .map(|entry| {
            let mut parts = entry.split(':').map(str::trim);
            let code = parts.next().filter(|c| !c.is_empty());
            let allowance = parts.next();
            let price = parts.next();

            let (Some(code), Some(allowance)) = (code, allowance) else {
                return Err(anyhow!("invalid SEED_PACKAGES entry {entry:?}, expected code:allowance[:price_cents]"));
            };
            let allowance: u32 = allowance
                .parse()
                .with_context(|| format!("invalid allowance in SEED_PACKAGES entry {entry:?}"))?;
            let price: i64 = price
                .map(str::parse::<i64>)
                .transpose()
                .with_context(|| format!("invalid price in SEED_PACKAGES entry {entry:?}"))?
                .unwrap_or(0);

            Ok(NewPackage::new(code, code, allowance).with_price(price))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.addr(), "127.0.0.1:3030");
        assert!(config.database_url.is_none());
        assert!(config.mail_webhook_url.is_none());
        assert_eq!(config.ledger.max_attempts, 5);
        assert!(config.seed_packages.is_empty());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("HTTP_PORT", "8080"),
            ("LEDGER_ADMIT_TIMEOUT_MS", "250"),
            ("APP_BASE_URL", "https://persona.example.com"),
            ("SEED_PACKAGES", "starter:5, pro:50:9900"),
            ("SEED_TESTS", "mbti, big-five ,"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.ledger.admit_timeout, Duration::from_millis(250));
        assert_eq!(config.ledger.access_link_base, "https://persona.example.com");
        assert_eq!(config.seed_packages.len(), 2);
        assert_eq!(config.seed_packages[1].code, "pro");
        assert_eq!(config.seed_packages[1].monthly_allowance, 50);
        assert_eq!(config.seed_packages[1].price_cents, 9900);
        assert_eq!(config.seed_tests, vec!["mbti", "big-five"]);
    }

    #[test]
    fn malformed_numbers_fail_startup() {
        let err = config(&[("LEDGER_MAX_ATTEMPTS", "many")]).unwrap_err();
        assert!(err.to_string().contains("LEDGER_MAX_ATTEMPTS"));

        assert!(config(&[("SEED_PACKAGES", "starter")]).is_err());
        assert!(config(&[("SEED_PACKAGES", "starter:x")]).is_err());
    }
}
