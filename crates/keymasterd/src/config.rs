//! Configuration file support for keymasterd
//!
//! Loads and validates keymasterd configuration from TOML files.
//! Default location: /etc/keymaster/keymasterd.toml
//!
//! Exactly one `[supplier.*]` table and one `[applier.*]` table must be
//! present; [`KeymasterConfig::validate`] resolves them into a
//! [`DaemonConfig`].

use keymaster_common::{KeymasterError, KeymasterResult};
use keymaster_types::PrivateKey;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/keymaster/keymasterd.toml";

/// `[supplier.keymaster_server]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeymasterServerConfig {
    /// Base URL, scheme and host only (e.g., `https://keymaster.example.com`)
    pub url: String,

    /// API token sent as `Authorization: Token <token>`
    pub token: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// `[supplier.udpu]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpuConfig {
    pub url: String,

    /// Name of the network whose server configuration this host runs
    #[serde(default = "default_network_name")]
    pub network_name: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// `[supplier.file]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSupplierConfig {
    /// JSON file holding a list of interfaces
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplierSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keymaster_server: Option<KeymasterServerConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udpu: Option<UdpuConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileSupplierConfig>,
}

/// `[applier.wg]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WgApplierConfig {
    /// Directory holding one `<name>.conf` per managed interface
    #[serde(default = "default_wg_config_dir")]
    pub config_dir: PathBuf,
}

/// `[applier.uci]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UciApplierConfig {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplierSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wg: Option<WgApplierConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uci: Option<UciApplierConfig>,
}

/// Complete keymasterd configuration, as written in the file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeymasterConfig {
    /// Seconds between the end of one pass and the start of the next
    #[serde(default = "default_sync_period")]
    pub sync_period_secs: u64,

    /// Base64 private key used for every interface, overriding all other sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Upper bound on interface operations running at once within a pass
    #[serde(default = "default_max_concurrent_applies")]
    pub max_concurrent_applies: usize,

    #[serde(default)]
    pub supplier: SupplierSection,

    #[serde(default)]
    pub applier: ApplierSection,
}

// Default functions
fn default_sync_period() -> u64 {
    60
}

fn default_max_concurrent_applies() -> usize {
    4
}

fn default_http_timeout() -> u64 {
    30
}

fn default_network_name() -> String {
    "default".to_string()
}

fn default_wg_config_dir() -> PathBuf {
    PathBuf::from("/etc/keymaster/wireguard")
}

impl Default for KeymasterConfig {
    fn default() -> Self {
        Self {
            sync_period_secs: default_sync_period(),
            private_key: None,
            max_concurrent_applies: default_max_concurrent_applies(),
            supplier: SupplierSection::default(),
            applier: ApplierSection::default(),
        }
    }
}

impl Default for WgApplierConfig {
    fn default() -> Self {
        Self {
            config_dir: default_wg_config_dir(),
        }
    }
}

/// The supplier selected by the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupplierConfig {
    KeymasterServer {
        url: Url,
        token: String,
        timeout: Duration,
    },
    Udpu {
        url: Url,
        network_name: String,
        timeout: Duration,
    },
    File {
        path: PathBuf,
    },
}

/// The applier selected by the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplierConfig {
    Wg { config_dir: PathBuf },
    Uci,
}

/// Validated configuration the daemon runs with.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub sync_period: Duration,
    pub private_key: Option<PrivateKey>,
    pub max_concurrent_applies: usize,
    pub supplier: SupplierConfig,
    pub applier: ApplierConfig,
}

impl KeymasterConfig {
    /// Load configuration from file
    ///
    /// A missing file is a configuration error: there is no usable default
    /// supplier.
    pub fn load(path: impl AsRef<Path>) -> KeymasterResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            KeymasterError::invalid_config(path.display().to_string(), format!("cannot read: {}", e))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            KeymasterError::InvalidConfig { message, .. } => {
                KeymasterError::invalid_config(path.display().to_string(), message)
            }
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> KeymasterResult<Self> {
        toml::from_str(content)
            .map_err(|e| KeymasterError::invalid_config("config", format!("Failed to parse: {}", e)))
    }

    /// Get sync period as Duration
    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_secs)
    }

    /// Validate configuration and resolve the supplier and applier selections
    pub fn validate(&self) -> KeymasterResult<DaemonConfig> {
        if self.sync_period_secs == 0 {
            return Err(KeymasterError::invalid_config(
                "sync_period_secs",
                "must be > 0",
            ));
        }

        if self.max_concurrent_applies == 0 {
            return Err(KeymasterError::invalid_config(
                "max_concurrent_applies",
                "must be > 0",
            ));
        }

        let private_key = self
            .private_key
            .as_deref()
            .map(|k| {
                k.parse::<PrivateKey>()
                    .map_err(|e| KeymasterError::invalid_config("private_key", e.to_string()))
            })
            .transpose()?;

        Ok(DaemonConfig {
            sync_period: self.sync_period(),
            private_key,
            max_concurrent_applies: self.max_concurrent_applies,
            supplier: self.supplier.resolve()?,
            applier: self.applier.resolve()?,
        })
    }
}

impl SupplierSection {
    fn resolve(&self) -> KeymasterResult<SupplierConfig> {
        let mut selected = Vec::new();

        if let Some(cfg) = &self.keymaster_server {
            if cfg.token.trim().is_empty() {
                return Err(KeymasterError::invalid_config(
                    "supplier.keymaster_server.token",
                    "must not be empty",
                ));
            }
            selected.push(SupplierConfig::KeymasterServer {
                url: parse_base_url("supplier.keymaster_server.url", &cfg.url)?,
                token: cfg.token.trim().to_string(),
                timeout: http_timeout("supplier.keymaster_server.timeout_secs", cfg.timeout_secs)?,
            });
        }

        if let Some(cfg) = &self.udpu {
            if cfg.network_name.is_empty() || cfg.network_name.contains('/') {
                return Err(KeymasterError::invalid_config(
                    "supplier.udpu.network_name",
                    format!("'{}' is not a valid network name", cfg.network_name),
                ));
            }
            selected.push(SupplierConfig::Udpu {
                url: parse_base_url("supplier.udpu.url", &cfg.url)?,
                network_name: cfg.network_name.clone(),
                timeout: http_timeout("supplier.udpu.timeout_secs", cfg.timeout_secs)?,
            });
        }

        if let Some(cfg) = &self.file {
            selected.push(SupplierConfig::File {
                path: cfg.path.clone(),
            });
        }

        exactly_one("supplier", selected)
    }
}

impl ApplierSection {
    fn resolve(&self) -> KeymasterResult<ApplierConfig> {
        let mut selected = Vec::new();

        if let Some(cfg) = &self.wg {
            selected.push(ApplierConfig::Wg {
                config_dir: cfg.config_dir.clone(),
            });
        }
        if self.uci.is_some() {
            selected.push(ApplierConfig::Uci);
        }

        exactly_one("applier", selected)
    }
}

fn exactly_one<T>(field: &str, mut selected: Vec<T>) -> KeymasterResult<T> {
    match selected.len() {
        1 => selected
            .pop()
            .ok_or_else(|| KeymasterError::internal("selection vanished")),
        0 => Err(KeymasterError::invalid_config(
            field,
            format!("no [{}.*] table configured", field),
        )),
        n => Err(KeymasterError::invalid_config(
            field,
            format!("{} [{}.*] tables configured, exactly one is allowed", n, field),
        )),
    }
}

fn http_timeout(field: &str, secs: u64) -> KeymasterResult<Duration> {
    if secs == 0 {
        return Err(KeymasterError::invalid_config(field, "must be > 0"));
    }
    Ok(Duration::from_secs(secs))
}

/// Parses a supplier base URL: `<scheme>://<host>[:<port>]`, nothing more.
pub fn parse_base_url(field: &str, raw: &str) -> KeymasterResult<Url> {
    let invalid = |why: &str| {
        KeymasterError::invalid_config(field, format!("'{}' {}", raw, why))
    };

    let url = Url::parse(raw.trim()).map_err(|_| invalid("is not a URL"))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid("must use http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("has no host"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("must not have a path, query or fragment"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("must not carry credentials"));
    }

    Ok(url)
}
