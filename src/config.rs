//! Configuration loading for provider credentials and the orchestrator's
//! environments file.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Provider kinds the environments file may declare for a manually
/// provisioned environment.
const PROVISIONABLE_KINDS: &[&str] = &["null", "manual"];

/// Scaleway credentials and defaults derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not required for API
    /// calls, but captured to support audit logging.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub project_id: String,
    /// Availability zone servers are launched in. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub zone: String,
    /// Commercial type for new servers.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub instance_type: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub architecture: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str) -> Self {
        Self {
            description,
            env_var,
        }
    }
}

impl ScalewayConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {}",
                metadata.description, metadata.env_var
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("machinist")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.secret_key,
            &FieldMetadata::new("Scaleway API secret key", "SCW_SECRET_KEY"),
        )?;
        Self::require_field(
            &self.project_id,
            &FieldMetadata::new("Scaleway project ID", "SCW_PROJECT_ID"),
        )?;
        Self::require_field(&self.zone, &FieldMetadata::new("availability zone", "SCW_ZONE"))?;
        Self::require_field(
            &self.instance_type,
            &FieldMetadata::new("instance type", "SCW_INSTANCE_TYPE"),
        )?;
        Self::require_field(
            &self.architecture,
            &FieldMetadata::new("CPU architecture", "SCW_ARCHITECTURE"),
        )?;
        Ok(())
    }
}

/// Parsed orchestrator environments file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct EnvironmentsFile {
    /// Environment declarations keyed by environment name.
    pub environments: BTreeMap<String, EnvironmentDecl>,
}

/// One environment declaration from the environments file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct EnvironmentDecl {
    /// Provider type declared for the environment.
    #[serde(rename = "type")]
    pub kind: String,
    /// Address of the bootstrap host, once one has been provisioned.
    #[serde(rename = "bootstrap-host", default)]
    pub bootstrap_host: Option<String>,
}

impl EnvironmentsFile {
    /// Reads and parses the environments file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and
    /// [`ConfigError::Parse`] when it is not valid YAML or lacks an
    /// `environments` section.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parses environments file content.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the content is not valid YAML or
    /// lacks an `environments` section.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Looks up the declaration for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEnvironment`] when `name` is not
    /// declared.
    pub fn declaration(&self, name: &str) -> Result<&EnvironmentDecl, ConfigError> {
        self.environments
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment {
                name: name.to_owned(),
            })
    }
}

impl EnvironmentDecl {
    /// Checks that the declaration can host provisioned machines: the
    /// provider type must be `null` or `manual` and no bootstrap host may be
    /// recorded yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IncompatibleProvider`] or
    /// [`ConfigError::BootstrapHostPresent`] accordingly.
    pub fn ensure_provisionable(&self, name: &str) -> Result<(), ConfigError> {
        if !PROVISIONABLE_KINDS.contains(&self.kind.as_str()) {
            return Err(ConfigError::IncompatibleProvider {
                name: name.to_owned(),
                kind: self.kind.clone(),
            });
        }
        if self
            .bootstrap_host
            .as_deref()
            .is_some_and(|host| !host.trim().is_empty())
        {
            return Err(ConfigError::BootstrapHostPresent {
                name: name.to_owned(),
            });
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the configuration loaders and parsers.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a configuration file cannot be read.
    #[error("cannot read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the requested environment is not declared.
    #[error("environment '{name}' not found in the environments file")]
    UnknownEnvironment {
        /// Environment name requested by the caller.
        name: String,
    },
    /// Raised when the declared provider type cannot host provisioned
    /// machines.
    #[error("environment '{name}' provider type is '{kind}', must be 'null' or 'manual'")]
    IncompatibleProvider {
        /// Environment name.
        name: String,
        /// Declared provider type.
        kind: String,
    },
    /// Raised when the environment already records a bootstrap host.
    #[error("environment '{name}' already has a bootstrap host")]
    BootstrapHostPresent {
        /// Environment name.
        name: String,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
