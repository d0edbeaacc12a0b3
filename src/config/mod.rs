//! Configuration management
//!
//! YAML-based configuration with:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ca: CaConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event ingress server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS/HTTPS configuration (if not set, server runs HTTP)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// TLS/HTTPS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_file: PathBuf,
    /// Path to TLS private key file (PEM format)
    pub key_file: PathBuf,
    /// Minimum TLS version ("1.2" or "1.3")
    #[serde(default = "default_tls_min_version")]
    pub min_version: String,
}

fn default_tls_min_version() -> String {
    "1.2".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: None,
        }
    }
}

/// Certificate authority configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CaConfig {
    /// Locator of the CA credential object: `<scheme>:::<container>/<key>`
    #[serde(default)]
    pub credential_ref: Option<String>,
}

/// Connection settings shared by every HTTP collaborator
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub url: String,
    /// Timeout in seconds (supports both timeout_secs and timeout field names)
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_ssl_verify")]
    pub ssl_verify: bool,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
    pub ssl_ca: Option<PathBuf>,
    /// Bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_ssl_verify() -> bool {
    true
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout(),
            ssl_verify: default_ssl_verify(),
            ssl_cert: None,
            ssl_key: None,
            ssl_ca: None,
            api_token: None,
        }
    }
}

/// Where the CA credential object is read from
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreKind {
    #[default]
    Http,
    File,
}

/// Object store configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub kind: ObjectStoreKind,
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
    /// Root directory (kind = file)
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Device registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
    /// Policy attached to newly registered certificates
    #[serde(default = "default_policy_name")]
    pub policy_name: String,
    /// Principal prefix: principals are `{certificate_prefix}/{certificateId}`
    #[serde(default = "default_certificate_prefix")]
    pub certificate_prefix: String,
}

fn default_policy_name() -> String {
    "fleet-device-policy".to_string()
}

fn default_certificate_prefix() -> String {
    "cert".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            policy_name: default_policy_name(),
            certificate_prefix: default_certificate_prefix(),
        }
    }
}

/// Message broker configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
    /// Delivery class for published messages (0 = best effort)
    #[serde(default)]
    pub qos: u8,
}

/// What to do when an expiring certificate is bound to several devices
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MultiDevicePolicy {
    /// Ask every bound device for a new CSR
    #[default]
    FanOut,
    /// Fail the invocation
    Reject,
}

/// Workflow behavior switches
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Include `length` in certificate delivery messages
    #[serde(default = "default_include_length")]
    pub include_length: bool,
    #[serde(default)]
    pub multi_device_policy: MultiDevicePolicy,
}

fn default_include_length() -> bool {
    true
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            include_length: default_include_length(),
            multi_device_policy: MultiDevicePolicy::default(),
        }
    }
}

/// Issuance ledger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Record issuances and replay them for redelivered signing requests
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ledger_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_ledger_url() -> String {
    "sqlite://./data/fleetcert.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_url: default_ledger_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file" or "both")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/fleetcert")
}

fn default_log_prefix() -> String {
    "fleetcert".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("FLEETCERT_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/fleetcert/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("fleetcert/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("FLEETCERT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("FLEETCERT_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        // Same variable name the device-management deployment always used
        if let Some(reference) = lookup("CA_CRED_PATH") {
            self.ca.credential_ref = Some(reference);
        }

        if let Some(url) = lookup("OBJECT_STORE_URL") {
            self.object_store.kind = ObjectStoreKind::Http;
            self.object_store.endpoint.url = url;
        }
        if let Some(root) = lookup("OBJECT_STORE_ROOT") {
            self.object_store.kind = ObjectStoreKind::File;
            self.object_store.root = Some(PathBuf::from(root));
        }

        if let Some(url) = lookup("REGISTRY_URL") {
            self.registry.endpoint.url = url;
        }
        if let Some(token) = lookup("REGISTRY_API_TOKEN") {
            self.registry.endpoint.api_token = Some(token);
        }
        if let Some(policy) = lookup("REGISTRY_POLICY_NAME") {
            self.registry.policy_name = policy;
        }
        if let Some(prefix) = lookup("REGISTRY_CERT_PREFIX") {
            self.registry.certificate_prefix = prefix;
        }

        if let Some(url) = lookup("BROKER_URL") {
            self.broker.endpoint.url = url;
        }
        if let Some(token) = lookup("BROKER_API_TOKEN") {
            self.broker.endpoint.api_token = Some(token);
        }

        if let Some(url) = lookup("LEDGER_DATABASE_URL") {
            self.ledger.enabled = true;
            self.ledger.database_url = url;
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("FLEETCERT_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
        if let Some(target) = lookup("FLEETCERT_LOG_TARGET") {
            self.logging.target = match target.to_lowercase().as_str() {
                "file" => LogTarget::File,
                "both" => LogTarget::Both,
                _ => LogTarget::Console,
            };
        }
        if let Some(dir) = lookup("FLEETCERT_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
    }

    /// Validate the configuration for running the service
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.registry.endpoint.url.trim().is_empty() {
            anyhow::bail!("registry.url must be set (or REGISTRY_URL)");
        }
        if self.broker.endpoint.url.trim().is_empty() {
            anyhow::bail!("broker.url must be set (or BROKER_URL)");
        }
        if self.registry.certificate_prefix.trim_end_matches('/').is_empty() {
            anyhow::bail!("registry.certificate_prefix cannot be empty");
        }
        if self.registry.policy_name.is_empty() {
            anyhow::bail!("registry.policy_name cannot be empty");
        }

        match self.object_store.kind {
            ObjectStoreKind::Http if self.object_store.endpoint.url.trim().is_empty() => {
                anyhow::bail!("object_store.url must be set for kind=http");
            }
            ObjectStoreKind::File if self.object_store.root.is_none() => {
                anyhow::bail!("object_store.root must be set for kind=file");
            }
            _ => {}
        }

        // A missing CA reference fails each signing request, not startup
        if self.ca.credential_ref.is_none() {
            eprintln!("[CONFIG] ca.credential_ref is not set; signing requests will fail");
        }

        if let Some(ref tls) = self.server.tls {
            if !matches!(tls.min_version.as_str(), "1.2" | "1.3") {
                anyhow::bail!("server.tls.min_version must be 1.2 or 1.3");
            }
            if !tls.cert_file.exists() {
                anyhow::bail!("TLS certificate file not found: {:?}", tls.cert_file);
            }
            if !tls.key_file.exists() {
                anyhow::bail!("TLS key file not found: {:?}", tls.key_file);
            }
        }

        Ok(())
    }
}
