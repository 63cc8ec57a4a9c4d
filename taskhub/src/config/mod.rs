//! Configuration system for the `TaskHub` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskhub/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::push;
use crate::push::websocket::DEFAULT_CONNECT_TIMEOUT as DEFAULT_PUSH_CONNECT_TIMEOUT;
use crate::repo::http::DEFAULT_REQUEST_TIMEOUT;

/// Service URL used when nothing else is configured.
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:5000";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A configured URL is malformed or unusable.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidUrl {
        /// Setting name.
        field: &'static str,
        /// Value that was given.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No credential directory was given and none could be determined.
    #[error("could not determine data directory for the credential (set --credential-dir)")]
    NoDataDir,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    service: ServiceFileConfig,
    session: SessionFileConfig,
}

/// `[service]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServiceFileConfig {
    url: Option<String>,
    push_url: Option<String>,
    request_timeout_secs: Option<u64>,
    push_connect_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    credential_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the task service.
    pub service_url: Url,
    /// Push channel URL; derived from `service_url` unless configured.
    pub push_url: Url,
    /// Per-request timeout for REST calls.
    pub request_timeout: Duration,
    /// Timeout for opening the push channel.
    pub push_connect_timeout: Duration,
    /// Directory holding the persisted credential.
    pub credential_dir: PathBuf,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/taskhub/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// a URL is invalid, or no credential directory can be determined.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file, dirs::data_dir())
    }

    /// Resolve a `ClientConfig` from CLI args, a parsed config file and the
    /// platform data directory. Priority: CLI > file > default.
    fn resolve(
        cli: &CliArgs,
        file: &ConfigFile,
        data_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let raw_service = cli
            .service_url
            .as_deref()
            .or(file.service.url.as_deref())
            .unwrap_or(DEFAULT_SERVICE_URL);
        let service_url = parse_url("service url", raw_service)?;

        let push_url = match cli.push_url.as_deref().or(file.service.push_url.as_deref()) {
            Some(raw) => parse_url("push url", raw)?,
            None => {
                push::derive_push_url(&service_url).map_err(|e| ConfigError::InvalidUrl {
                    field: "service url",
                    value: raw_service.to_string(),
                    reason: e.to_string(),
                })?
            }
        };

        let credential_dir = cli
            .credential_dir
            .clone()
            .or_else(|| file.session.credential_dir.clone())
            .or_else(|| data_dir.map(|dir| dir.join("taskhub")))
            .ok_or(ConfigError::NoDataDir)?;

        Ok(Self {
            service_url,
            push_url,
            request_timeout: file
                .service
                .request_timeout_secs
                .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs),
            push_connect_timeout: file
                .service
                .push_connect_timeout_secs
                .map_or(DEFAULT_PUSH_CONNECT_TIMEOUT, Duration::from_secs),
            credential_dir,
        })
    }
}

/// Global CLI arguments, flattened into the binary's parser.
#[derive(clap::Args, Debug, Default)]
pub struct CliArgs {
    /// Base URL of the task service.
    #[arg(long, global = true, env = "TASKHUB_API_URL")]
    pub service_url: Option<String>,

    /// Push channel URL (default: derived from the service URL).
    #[arg(long, global = true, env = "TASKHUB_PUSH_URL")]
    pub push_url: Option<String>,

    /// Directory holding the persisted credential.
    #[arg(long, global = true, env = "TASKHUB_CREDENTIAL_DIR")]
    pub credential_dir: Option<PathBuf>,

    /// Path to config file (default: `~/.config/taskhub/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "TASKHUB_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskhub.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidUrl {
            field,
            value: raw.to_string(),
            reason: "not a hierarchical url".to_string(),
        });
    }
    Ok(url)
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskhub").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
