//! Route configuration.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::server::RouteId;

/// TLS negotiation mode towards the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Never use TLS.
    #[default]
    Disable,
    /// Use TLS if the server offers it.
    Allow,
    /// Require TLS without verifying the certificate.
    Require,
    /// Require TLS and verify the certificate chain.
    VerifyCa,
    /// Require TLS, verify the chain and the host name.
    VerifyFull,
}

impl TlsMode {
    /// Whether this mode checks the server certificate against a CA.
    #[must_use]
    pub fn verifies(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }
}

/// TLS settings for backend connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Negotiation mode.
    pub mode: TlsMode,
    /// CA bundle used by the verifying modes.
    pub ca_file: Option<String>,
    /// Client certificate.
    pub cert_file: Option<String>,
    /// Client private key.
    pub key_file: Option<String>,
    /// Allowed protocol versions, e.g. `"tlsv1.2"`.
    pub protocols: Option<String>,
}

/// Configuration for one (database, user) route.
///
/// Integer fields use the units of the configuration file: `pool_timeout` and
/// `connect_timeout` are milliseconds, `pool_ttl` is seconds. Zero disables the
/// corresponding limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Database the route serves.
    pub database: String,

    /// User the route serves.
    pub user: String,

    /// Backend hostname or IP address.
    pub host: String,

    /// Backend port (default: 5432).
    pub port: u16,

    /// Maximum number of backend servers; 0 means unlimited.
    pub pool_size: usize,

    /// How long a checkout waits for a server, in milliseconds.
    pub pool_timeout: u64,

    /// How long a server may stay idle, in seconds.
    pub pool_ttl: u64,

    /// Backend connect deadline, in milliseconds.
    pub connect_timeout: u64,

    /// TLS settings.
    pub tls: TlsConfig,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            user: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            pool_size: 10,
            pool_timeout: 0,
            pool_ttl: 0,
            connect_timeout: 30_000,
            tls: TlsConfig::default(),
        }
    }
}

impl RouteConfig {
    /// Create a configuration for the given route with default values.
    #[must_use]
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            user: user.into(),
            ..Self::default()
        }
    }

    /// Set the backend host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the backend port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the pool size.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set how long a checkout may wait.
    #[must_use]
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = millis(timeout);
        self
    }

    /// Set the idle time-to-live. Sub-second parts are dropped.
    #[must_use]
    pub fn pool_ttl(mut self, ttl: Duration) -> Self {
        self.pool_ttl = ttl.as_secs();
        self
    }

    /// Set the backend connect deadline.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = millis(timeout);
        self
    }

    /// Set the TLS configuration.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Route identity.
    #[must_use]
    pub fn route_id(&self) -> RouteId {
        RouteId::new(self.database.clone(), self.user.clone())
    }

    /// Pool capacity, with 0 mapped to unlimited.
    #[must_use]
    pub fn capacity(&self) -> usize {
        if self.pool_size == 0 {
            usize::MAX
        } else {
            self.pool_size
        }
    }

    /// Checkout wait limit; `None` waits forever.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        non_zero(Duration::from_millis(self.pool_timeout))
    }

    /// Idle time-to-live; `None` keeps idle servers forever.
    #[must_use]
    pub fn idle_ttl(&self) -> Option<Duration> {
        non_zero(Duration::from_secs(self.pool_ttl))
    }

    /// Connect deadline; `None` waits for the platform alone.
    #[must_use]
    pub fn connect_deadline(&self) -> Option<Duration> {
        non_zero(Duration::from_millis(self.connect_timeout))
    }

    /// Check the settings a route cannot run without.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.database.is_empty() {
            return Err(PoolError::Config("database must be set".into()));
        }
        if self.user.is_empty() {
            return Err(PoolError::Config("user must be set".into()));
        }
        if self.host.is_empty() {
            return Err(PoolError::Config("host must be set".into()));
        }
        if self.port == 0 {
            return Err(PoolError::Config("port must be non-zero".into()));
        }
        if self.tls.mode.verifies() && self.tls.ca_file.is_none() {
            return Err(PoolError::Config(format!(
                "tls mode {:?} requires ca_file",
                self.tls.mode
            )));
        }
        if self.tls.cert_file.is_some() != self.tls.key_file.is_some() {
            return Err(PoolError::Config(
                "tls cert_file and key_file must be set together".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the backend address.
    ///
    /// IP literals are used as is; names go through the system resolver and
    /// the first address wins.
    pub fn backend_addr(&self) -> Result<SocketAddr, PoolError> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        let resolve_error = || PoolError::Resolve {
            host: self.host.clone(),
            port: self.port,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                tracing::debug!(host = %self.host, error = %e, "backend resolution failed");
                resolve_error()
            })?
            .next()
            .ok_or_else(resolve_error)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() { None } else { Some(d) }
}
