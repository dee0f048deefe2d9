//! Process configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;
use tyrehub_inventory::NegativeStockPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Names of the bus objects this service owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub redis_url: String,
    pub exchange: String,
    pub order_queue: String,
    pub query_queue: String,
    pub dead_letter_queue: String,
    pub consumer_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    /// Present whenever `use_persistent_stores` is set.
    pub database: Option<DatabaseConfig>,
    pub bus: BusConfig,
    pub negative_stock_policy: NegativeStockPolicy,
    pub run_consumers: bool,
    pub cors_allowed_origin: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let use_persistent_stores = vars.parse_bool("USE_PERSISTENT_STORES", false)?;
        let database = if use_persistent_stores {
            Some(DatabaseConfig {
                url: vars.required("DATABASE_URL")?,
                max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", 10u32)?,
            })
        } else {
            None
        };

        Ok(Self {
            bind_addr: vars.parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            use_persistent_stores,
            database,
            bus: BusConfig {
                redis_url: vars.string("REDIS_URL", "redis://localhost:6379"),
                exchange: vars.string("BUS_EXCHANGE", "topic_logs"),
                order_queue: vars.string("ORDER_QUEUE", "tyres.order_created"),
                query_queue: vars.string("QUERY_QUEUE", "rpc.tyres.get"),
                dead_letter_queue: vars.string("DEAD_LETTER_QUEUE", "tyres.dead_letter"),
                consumer_name: vars.string("CONSUMER_NAME", "tyrehub-1"),
            },
            negative_stock_policy: vars.parse("NEGATIVE_STOCK_POLICY", NegativeStockPolicy::Reject)?,
            run_consumers: vars.parse_bool("RUN_CONSUMERS", true)?,
            cors_allowed_origin: vars.string("CORS_ALLOWED_ORIGIN", "http://localhost:3000"),
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.parse::<T>() {
                Ok(parsed) => Ok(parsed),
                Err(e) => Err(ConfigError::Invalid {
                    var: key,
                    reason: e.to_string(),
                    value,
                }),
            },
        }
    }

    fn parse_bool(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var: key,
                    value,
                    reason: "expected a boolean".to_string(),
                }),
            },
        }
    }
}
