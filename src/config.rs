//! Configuration loading via `ortho-config`.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::orchestrator::OrchestratorConfig;
use crate::volume::{
    ClusterMetadata, DEFAULT_CLUSTER_FLAVOR, DEFAULT_CLUSTER_ID, DEFAULT_CLUSTER_TYPE,
};

/// Endpoint, target, and volume settings derived from environment variables
/// and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CNS",
    discovery(
        app_name = "cnsvol",
        env_var = "CNSVOL_CONFIG_PATH",
        config_file_name = "cnsvol.toml",
        dotfile_name = ".cnsvol.toml",
        project_file_name = "cnsvol.toml"
    )
)]
pub struct CnsConfig {
    /// Management endpoint URL, optionally carrying `user:password@`.
    #[ortho_config(default = String::new())]
    pub vc_url: String,
    /// User name; overrides any user embedded in the URL.
    pub vc_user: Option<String>,
    /// Password; overrides any password embedded in the URL.
    pub vc_pass: Option<String>,
    /// Datacenter holding the target datastore.
    #[ortho_config(default = String::new())]
    pub datacenter: String,
    /// Datastore on which volumes are created.
    #[ortho_config(default = String::new())]
    pub datastore: String,
    /// Existing volume targeted by query and delete. `CNS_VOLUMEID` is read
    /// when `CNS_VOLUME_ID` is unset.
    pub volume_id: Option<String>,
    /// Name for new volumes. A `pvc-<uuid>` name is generated when unset.
    pub volume_name: Option<String>,
    /// Size of new volumes in megabytes. `CNS_VOLUMESIZE` is read when
    /// `CNS_VOLUME_SIZE_MB` is unset.
    #[ortho_config(default = 1024)]
    pub volume_size_mb: i64,
    /// Identifier of the owning cluster recorded on new volumes.
    #[ortho_config(default = DEFAULT_CLUSTER_ID.to_owned())]
    pub cluster_id: String,
    /// Type of the owning cluster.
    #[ortho_config(default = DEFAULT_CLUSTER_TYPE.to_owned())]
    pub cluster_type: String,
    /// Flavour of the owning cluster.
    #[ortho_config(default = DEFAULT_CLUSTER_FLAVOR.to_owned())]
    pub cluster_flavor: String,
    /// Skip TLS certificate verification.
    #[ortho_config(default = true)]
    pub insecure: bool,
    /// Remove the backing disk when deleting a volume.
    #[ortho_config(default = true)]
    pub delete_disk: bool,
    /// Enables debug logging and request tracing.
    #[ortho_config(default = false)]
    pub debug: bool,
    /// Directory receiving request traces when `debug` is set.
    #[ortho_config(default = String::from(".trace"))]
    pub trace_dir: String,
    /// Delay between task polls in milliseconds.
    #[ortho_config(default = 1000)]
    pub poll_interval_ms: u64,
    /// Upper bound on the wait for a single task, in seconds.
    pub wait_timeout_secs: Option<u64>,
}

/// Compact spelling of `CNS_VOLUME_ID`, also accepted.
const COMPACT_VOLUME_ID_ENV: &str = "CNS_VOLUMEID";
/// Compact spelling of `CNS_VOLUME_SIZE_MB`, also accepted.
const COMPACT_VOLUME_SIZE_ENV: &str = "CNS_VOLUMESIZE";

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

/// User name and password for the management endpoint.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a session adapter needs to connect.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectOptions {
    /// Endpoint URL with credentials stripped.
    pub endpoint: Url,
    /// Login credentials.
    pub credentials: Credentials,
    /// Skip TLS certificate verification.
    pub insecure_skip_verify: bool,
    /// Directory receiving request traces, when tracing is enabled.
    pub trace_dir: Option<Utf8PathBuf>,
}

impl CnsConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to cnsvol.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails or a
    /// `CNS_VOLUMESIZE` value is not a number.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([OsString::from("cnsvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.with_compact_env()
    }

    /// Fills `volume_id` and `volume_size_mb` from `CNS_VOLUMEID` and
    /// `CNS_VOLUMESIZE` when `CNS_VOLUME_ID` and `CNS_VOLUME_SIZE_MB` are
    /// unset.
    fn with_compact_env(mut self) -> Result<Self, ConfigError> {
        if env::var_os("CNS_VOLUME_ID").is_none()
            && let Some(id) = non_empty_env(COMPACT_VOLUME_ID_ENV)
        {
            self.volume_id = Some(id);
        }
        if env::var_os("CNS_VOLUME_SIZE_MB").is_none()
            && let Some(raw) = non_empty_env(COMPACT_VOLUME_SIZE_ENV)
        {
            self.volume_size_mb = raw.trim().parse().map_err(|_| {
                ConfigError::Parse(format!(
                    "{COMPACT_VOLUME_SIZE_ENV} must be a whole number of megabytes, got {raw:?}"
                ))
            })?;
        }
        Ok(self)
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and configuration key to set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidPollInterval`] when polling would spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.vc_url,
            &FieldMetadata::new("management endpoint URL", "CNS_VC_URL", "vc_url"),
        )?;
        Self::require_field(
            &self.datacenter,
            &FieldMetadata::new("datacenter name", "CNS_DATACENTER", "datacenter"),
        )?;
        Self::require_field(
            &self.datastore,
            &FieldMetadata::new("datastore name", "CNS_DATASTORE", "datastore"),
        )?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }

    /// Builds the connection settings: the URL is parsed, its embedded
    /// credentials are overridden by `vc_user`/`vc_pass` when set, and then
    /// stripped from the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or the URL is invalid.
    pub fn connect_options(&self) -> Result<ConnectOptions, ConfigError> {
        self.validate()?;
        let mut endpoint = Url::parse(self.vc_url.trim()).map_err(|err| ConfigError::InvalidUrl {
            url: redact_url(&self.vc_url),
            message: err.to_string(),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl {
                url: redact_url(&self.vc_url),
                message: String::from("URL cannot carry a path"),
            });
        }

        let username = self
            .vc_user
            .clone()
            .unwrap_or_else(|| endpoint.username().to_owned());
        let password = self
            .vc_pass
            .clone()
            .or_else(|| endpoint.password().map(str::to_owned))
            .unwrap_or_default();

        // `set_username`/`set_password` only fail for URLs without a host,
        // which `cannot_be_a_base` already excluded.
        endpoint.set_username("").ok();
        endpoint.set_password(None).ok();

        Ok(ConnectOptions {
            endpoint,
            credentials: Credentials { username, password },
            insecure_skip_verify: self.insecure,
            trace_dir: self
                .debug
                .then(|| Utf8PathBuf::from(self.trace_dir.trim())),
        })
    }

    /// Returns the cluster tags for volumes owned by `owner`.
    #[must_use]
    pub fn cluster_metadata(&self, owner: &str) -> ClusterMetadata {
        ClusterMetadata {
            cluster_type: self.cluster_type.clone(),
            cluster_id: self.cluster_id.clone(),
            owner_principal: owner.to_owned(),
            cluster_flavor: self.cluster_flavor.clone(),
        }
    }

    /// Builds the orchestrator settings for volumes owned by `owner`.
    #[must_use]
    pub fn orchestrator_config(&self, owner: &str) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            wait_timeout: self.wait_timeout_secs.map(Duration::from_secs),
            ..OrchestratorConfig::new(self.cluster_metadata(owner))
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                url.set_password(Some("redacted")).ok();
            }
            url.to_string()
        }
        Err(_) => raw.split('@').next_back().unwrap_or(raw).to_owned(),
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when the endpoint URL cannot be parsed.
    #[error("invalid endpoint URL {url}: {message}")]
    InvalidUrl {
        /// URL as configured, password redacted.
        url: String,
        /// Parser message.
        message: String,
    },
    /// Raised when the poll interval is zero.
    #[error("poll interval must be greater than zero (set CNS_POLL_INTERVAL_MS)")]
    InvalidPollInterval,
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
