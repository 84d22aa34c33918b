use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Global configuration for the service
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Document store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Status log settings
    #[serde(default)]
    pub status: StatusConfig,

    /// Cross-origin policy for the browser extension
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// HTTP port (default: 8000)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Seconds to wait for the server to stop on shutdown (default: 5)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Socket address to listen on. `bind` must be an IPv4 or IPv6 literal.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self.bind.trim().parse().map_err(|e| {
            anyhow::anyhow!("server: 'bind' must be an IP address, got '{}': {}", self.bind, e)
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Which document store implementation to use
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    /// Durable SQLite file (default)
    #[default]
    Sqlite,
    /// Process-local, lost on exit
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Backend: "sqlite" (default) or "memory"
    #[serde(default)]
    pub backend: DatabaseBackend,

    /// SQLite database file (default: ./proxyslot.db)
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Logical database name reported in logs
    #[serde(default = "default_database_name")]
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            path: default_database_path(),
            name: default_database_name(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    /// Number of status checks listed when no limit is given (default: 1000)
    #[serde(default = "default_list_limit")]
    pub default_list_limit: usize,

    /// Largest limit a caller may request (default: 10000)
    #[serde(default = "default_max_list_limit")]
    pub max_list_limit: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            default_list_limit: default_list_limit(),
            max_list_limit: default_max_list_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    /// Allowed origins. A trailing `*` matches any suffix,
    /// e.g. "chrome-extension://*".
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Send Access-Control-Allow-Credentials (default: true)
    #[serde(default = "default_true")]
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allow_credentials: true,
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8000
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./proxyslot.db")
}

fn default_database_name() -> String {
    "vpn_extension".to_string()
}

fn default_list_limit() -> usize {
    crate::status::DEFAULT_LIST_LIMIT
}

fn default_max_list_limit() -> usize {
    10_000
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:8000".to_string(),
        "chrome-extension://*".to_string(),
        "moz-extension://*".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment
    /// overrides are applied before validation.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            warn!(path = %path.display(), "Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PROXYSLOT_*` (and plain `PORT`) overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PROXYSLOT_PORT").or_else(|| lookup("PORT")) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid port override '{}': {}", port, e))?;
        }

        if let Some(bind) = lookup("PROXYSLOT_BIND") {
            self.server.bind = bind;
        }

        if let Some(path) = lookup("PROXYSLOT_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Some(backend) = lookup("PROXYSLOT_DATABASE_BACKEND") {
            self.database.backend = match backend.trim().to_ascii_lowercase().as_str() {
                "sqlite" => DatabaseBackend::Sqlite,
                "memory" => DatabaseBackend::Memory,
                other => anyhow::bail!("Unknown database backend override '{}'", other),
            };
        }

        Ok(())
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.bind.trim().is_empty() {
            errors.push("server: 'bind' must not be empty".to_string());
        } else if let Err(e) = self.server.socket_addr() {
            errors.push(e.to_string());
        }

        if self.database.backend == DatabaseBackend::Sqlite
            && self.database.path.as_os_str().is_empty()
        {
            errors.push("database: sqlite backend requires 'path'".to_string());
        }

        if self.status.default_list_limit == 0 {
            errors.push("status: 'default_list_limit' must be greater than 0".to_string());
        }

        if self.status.default_list_limit > self.status.max_list_limit {
            errors.push(format!(
                "status: 'default_list_limit' ({}) exceeds 'max_list_limit' ({})",
                self.status.default_list_limit, self.status.max_list_limit
            ));
        }

        if self.cors.allowed_origins.iter().any(|o| o.trim().is_empty()) {
            errors.push("cors: 'allowed_origins' entries must not be empty".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
