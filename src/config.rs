//! Configuration handling for the bartender database layer.
//!
//! Values come from CLI arguments with environment variable fallbacks. The
//! database section is a separate `clap` struct so library users can build a
//! provider from the environment alone.

use crate::error::{DbError, DbResult};
use clap::Parser;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

const MISSING_CONNECTION_STRING: &str =
    "PG_CONNECTION_STRING environment variable is required for PostgreSQL access.";

/// Pool tuning read from the connection string's query, e.g.
/// `postgres://host/bartender?max_connections=20&acquire_timeout=5`.
///
/// Unset fields fall back to the `DEFAULT_*` constants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_connections: Option<u32>,
    /// Connections kept open while idle; zero keeps the pool fully lazy
    pub min_connections: Option<u32>,
    pub idle_timeout_secs: Option<u64>,
    /// How long `acquire` waits before failing with `PoolExhausted`
    pub acquire_timeout_secs: Option<u64>,
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Query keys consumed here and never forwarded to the driver.
    const KEYS: [&'static str; 5] = [
        "max_connections",
        "min_connections",
        "idle_timeout",
        "acquire_timeout",
        "test_before_acquire",
    ];

    /// Take the pool keys out of `url`, leaving every other parameter in place.
    pub fn take_from_url(url: &mut Url) -> DbResult<Self> {
        let (ours, driver): (Vec<_>, Vec<_>) = url
            .query_pairs()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
            .partition(|(k, _)| Self::KEYS.contains(&k.as_str()));

        let mut options = Self::default();
        for (key, value) in &ours {
            match key.as_str() {
                "max_connections" => options.max_connections = Some(parse_option(key, value)?),
                "min_connections" => options.min_connections = Some(parse_option(key, value)?),
                "idle_timeout" => options.idle_timeout_secs = Some(parse_option(key, value)?),
                "acquire_timeout" => options.acquire_timeout_secs = Some(parse_option(key, value)?),
                _ => options.test_before_acquire = Some(parse_option(key, value)?),
            }
        }

        if driver.is_empty() {
            url.set_query(None);
        } else if !ours.is_empty() {
            url.query_pairs_mut().clear().extend_pairs(driver);
        }

        options.validate()?;
        Ok(options)
    }

    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    pub fn validate(&self) -> DbResult<()> {
        let max = self.max_connections_or_default();
        if max == 0 {
            return Err(DbError::configuration("max_connections must be at least 1"));
        }
        if self.min_connections_or_default() > max {
            return Err(DbError::configuration(format!(
                "min_connections ({}) cannot exceed max_connections ({max})",
                self.min_connections_or_default()
            )));
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err(DbError::configuration(
                "acquire_timeout of 0 would fail every acquire",
            ));
        }
        Ok(())
    }
}

fn parse_option<T: FromStr>(key: &str, value: &str) -> DbResult<T> {
    value.parse().map_err(|_| {
        DbError::configuration(format!(
            "invalid value '{value}' for pool option {key} in PG_CONNECTION_STRING"
        ))
    })
}

/// Value of `PG_SSL_MODE`.
///
/// Matching is exact: only `disable` turns TLS off and only `allow` skips
/// certificate checks. Any other value, including unknown ones, is kept as-is
/// and treated as a verifying mode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
    Other(String),
}

impl SslMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Disable => "disable",
            Self::Allow => "allow",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
            Self::Other(raw) => raw,
        }
    }
}

impl FromStr for SslMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "disable" => Self::Disable,
            "allow" => Self::Allow,
            "prefer" => Self::Prefer,
            "require" => Self::Require,
            "verify-ca" => Self::VerifyCa,
            "verify-full" => Self::VerifyFull,
            other => Self::Other(other.to_string()),
        })
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_ssl_mode(s: &str) -> Result<SslMode, String> {
    s.parse().map_err(|never: std::convert::Infallible| match never {})
}

/// Transport security applied on top of the connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    /// Nothing configured; whatever `sslmode` the URL carries stays in effect.
    Inherit,
    /// Encrypt the connection. Certificates are checked only when `verify_certificates`.
    Encrypted { verify_certificates: bool },
}

impl TransportSecurity {
    /// `PG_SSL_MODE` wins when it is anything but `disable`; the legacy `PG_SSL`
    /// flag only applies otherwise and never verifies certificates.
    pub fn derive(ssl_mode: &SslMode, legacy_ssl: bool) -> Self {
        if *ssl_mode != SslMode::Disable {
            Self::Encrypted {
                verify_certificates: *ssl_mode != SslMode::Allow,
            }
        } else if legacy_ssl {
            Self::Encrypted {
                verify_certificates: false,
            }
        } else {
            Self::Inherit
        }
    }
}

fn parse_ssl_flag(s: &str) -> Result<bool, String> {
    Ok(s == "true")
}

/// PostgreSQL settings, read once when the provider is built.
#[derive(Debug, Clone, Default, Parser)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL (sensitive - not logged).
    /// Pool tuning can be appended as query parameters, e.g. ?max_connections=20
    #[arg(long = "pg-connection-string", env = "PG_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Transport security mode
    #[arg(
        long = "pg-ssl-mode",
        env = "PG_SSL_MODE",
        default_value = "disable",
        value_parser = parse_ssl_mode
    )]
    pub ssl_mode: SslMode,

    /// Legacy switch: "true" enables TLS without certificate verification
    #[arg(
        long = "pg-ssl",
        env = "PG_SSL",
        default_value = "false",
        value_parser = parse_ssl_flag,
        action = clap::ArgAction::Set
    )]
    pub ssl: bool,
}

/// Resolved inputs for building the internal pool.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Connection URL with pool option keys removed (sensitive - not logged).
    pub connection_string: String,
    pub pool_options: PoolOptions,
    pub security: TransportSecurity,
}

impl DatabaseConfig {
    /// Read the database section from the environment only.
    pub fn from_env() -> DbResult<Self> {
        Self::try_parse_from([env!("CARGO_PKG_NAME")])
            .map_err(|e| DbError::configuration(e.to_string()))
    }

    /// Config pointing at `connection_string` with default SSL settings.
    pub fn with_connection_string(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Self::default()
        }
    }

    pub fn transport_security(&self) -> TransportSecurity {
        TransportSecurity::derive(&self.ssl_mode, self.ssl)
    }

    /// Resolve the settings needed to build a pool.
    ///
    /// Fails with `DbError::Configuration` when the connection string is absent,
    /// is not a URL, or carries invalid pool options.
    pub fn connection_settings(&self) -> DbResult<ConnectionSettings> {
        let raw = self
            .connection_string
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DbError::configuration(MISSING_CONNECTION_STRING))?;

        let mut url = Url::parse(raw).map_err(|e| {
            DbError::configuration(format!("PG_CONNECTION_STRING is not a valid URL: {e}"))
        })?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(DbError::configuration(format!(
                "PG_CONNECTION_STRING must use the postgres:// scheme, got '{}'",
                url.scheme()
            )));
        }

        let pool_options = PoolOptions::take_from_url(&mut url)?;

        Ok(ConnectionSettings {
            connection_string: url.to_string(),
            pool_options,
            security: self.transport_security(),
        })
    }
}

/// Configuration for the bartender-db HTTP service.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "bartender-db",
    about = "Snapshot metadata API backed by a lazily created PostgreSQL pool",
    version,
    author
)]
pub struct Config {
    #[command(flatten)]
    pub database: DatabaseConfig,

    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "HTTP_PORT")]
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig::default(),
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
