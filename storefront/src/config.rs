//! Configuration management for the storefront service.
//!
//! Loads configuration from environment variables (and `.env` via `dotenvy`
//! in `main`). Secrets are required; everything else has a default.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration failures. Startup aborts on any of them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set (or empty)
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed
    #[error("invalid value for {name}: {value:?}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server
    pub server: ServerConfig,
    /// Payment processor
    pub stripe: StripeConfig,
    /// Token verification
    pub auth: AuthConfig,
    /// `PostgreSQL`; `None` selects the in-memory store
    pub database: Option<DatabaseConfig>,
    /// Storefront base URL for the success and cancel redirects
    pub frontend_url: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Prometheus exporter port
    pub metrics_port: u16,
    /// How long in-flight fulfillments may take to drain on shutdown
    pub shutdown_timeout: Duration,
}

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    /// API secret key
    pub secret_key: String,
    /// Webhook signing secret
    pub webhook_secret: String,
    /// API base URL
    pub api_base: String,
    /// Accepted webhook timestamp skew
    pub webhook_tolerance: Duration,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("webhook_tolerance", &self.webhook_tolerance)
            .finish_non_exhaustive()
    }
}

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").finish_non_exhaustive()
    }
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Missing`]: `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`,
    ///   `FRONTEND_URL`, or `JWT_SECRET` is unset
    /// - [`ConfigError::Invalid`]: a numeric variable does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration through `lookup` (the environment in production,
    /// a map in tests).
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let parsed = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            lookup(name).map_or(Ok(default), |value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid { name, value })
            })
        };
        let narrow = |name: &'static str, value: u64| {
            u16::try_from(value).map_err(|_| ConfigError::Invalid {
                name,
                value: value.to_string(),
            })
        };

        let database = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| -> Result<DatabaseConfig, ConfigError> {
                let max = parsed("DATABASE_MAX_CONNECTIONS", 10)?;
                Ok(DatabaseConfig {
                    url,
                    max_connections: u32::try_from(max).map_err(|_| ConfigError::Invalid {
                        name: "DATABASE_MAX_CONNECTIONS",
                        value: max.to_string(),
                    })?,
                })
            })
            .transpose()?;

        Ok(Self {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: narrow("PORT", parsed("PORT", 3000)?)?,
                metrics_port: narrow("METRICS_PORT", parsed("METRICS_PORT", 9090)?)?,
                shutdown_timeout: Duration::from_secs(parsed("SHUTDOWN_TIMEOUT_SECS", 30)?),
            },
            stripe: StripeConfig {
                secret_key: required("STRIPE_SECRET_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                api_base: lookup("STRIPE_API_BASE")
                    .unwrap_or_else(|| crate::payment::stripe::DEFAULT_API_BASE.to_string()),
                webhook_tolerance: Duration::from_secs(parsed(
                    "STRIPE_WEBHOOK_TOLERANCE_SECS",
                    300,
                )?),
            },
            auth: AuthConfig {
                jwt_secret: required("JWT_SECRET")?,
            },
            database,
            frontend_url: required("FRONTEND_URL")?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, String> {
        HashMap::from([
            ("STRIPE_SECRET_KEY", "sk_test_1".to_string()),
            ("STRIPE_WEBHOOK_SECRET", "whsec_1".to_string()),
            ("FRONTEND_URL", "http://localhost:5173".to_string()),
            ("JWT_SECRET", "secret".to_string()),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&base()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.metrics_port, 9090);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.stripe.api_base, "https://api.stripe.com");
        assert_eq!(config.stripe.webhook_tolerance, Duration::from_secs(300));
        assert!(config.database.is_none());
    }

    #[test]
    fn each_secret_is_required() {
        for name in ["STRIPE_SECRET_KEY", "STRIPE_WEBHOOK_SECRET", "FRONTEND_URL", "JWT_SECRET"] {
            let mut vars = base();
            vars.remove(name);
            assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing(name));

            vars.insert(name, "  ".to_string());
            assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing(name));
        }
    }

    #[test]
    fn database_and_overrides() {
        let mut vars = base();
        vars.insert("DATABASE_URL", "postgres://localhost/shop".to_string());
        vars.insert("DATABASE_MAX_CONNECTIONS", "4".to_string());
        vars.insert("PORT", "8080".to_string());

        let config = load(&vars).unwrap();
        let database = config.database.unwrap();
        assert_eq!(database.max_connections, 4);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let mut vars = base();
        vars.insert("PORT", "eighty".to_string());
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { name: "PORT", .. })));

        let mut vars = base();
        vars.insert("METRICS_PORT", "70000".to_string());
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { name: "METRICS_PORT", .. })));
    }
}
