//! Layered configuration loading.

use std::env;
use std::fs;
use std::path::Path;

use keystone_telemetry::LogFormat;
use serde_json::Value;

use crate::{ConfigError, KeystoneConfig};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "KEYSTONE";

/// Loads configuration in layers, later layers overriding earlier ones:
///
/// 1. Defaults (or a preset)
/// 2. Configuration files and strings, TOML or JSON, merged field by field
/// 3. A `.env` file, feeding the process environment
/// 4. Environment variables named `PREFIX__SECTION__KEY`
///
/// [`load`](Self::load) validates the result.
///
/// # Example
///
/// ```no_run
/// use keystone_config::ConfigLoader;
///
/// # fn main() -> Result<(), keystone_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("keystone.toml")?
///     .with_dotenv()?
///     .with_env_prefix("KEYSTONE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: Value,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&KeystoneConfig::default())
    }

    fn from_config(config: &KeystoneConfig) -> Self {
        Self {
            config: serde_json::to_value(config).unwrap_or(Value::Null),
            env_prefix: None,
        }
    }

    /// Resets to the default values.
    #[must_use]
    pub fn with_defaults(self) -> Self {
        Self {
            env_prefix: self.env_prefix,
            ..Self::new()
        }
    }

    /// Resets to the development preset.
    ///
    /// ```
    /// use keystone_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(self) -> Self {
        Self {
            env_prefix: self.env_prefix,
            ..Self::from_config(&KeystoneConfig::development())
        }
    }

    /// Resets to the production preset.
    #[must_use]
    pub fn with_production(self) -> Self {
        Self {
            env_prefix: self.env_prefix,
            ..Self::from_config(&KeystoneConfig::production())
        }
    }

    /// Merges a configuration file. The format follows the extension
    /// (`.toml` or `.json`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, malformed or
    /// has an unsupported extension.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::unsupported_format(path.display().to_string()))?;
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        tracing::debug!(path = %path.display(), "Loading configuration file");
        self.with_string(&content, &format)
    }

    /// Merges a configuration file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merges configuration from a string in `format` ("toml" or "json").
    ///
    /// Only the keys present in `content` change; the rest keep their
    /// current values.
    ///
    /// ```
    /// use keystone_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[router]\nglobal_prefix = \"api\"", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.router.global_prefix.as_deref(), Some("api"));
    /// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error for malformed content, unknown fields or an
    /// unsupported format.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer: Value = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            other => return Err(ConfigError::unsupported_format(other)),
        };

        merge(&mut self.config, layer);
        // Surface unknown fields and type errors at the layer that caused them.
        serde_json::from_value::<KeystoneConfig>(self.config.clone())?;
        Ok(self)
    }

    /// Sets the prefix of environment overrides.
    ///
    /// With prefix `KEYSTONE`, `KEYSTONE__SERVER__HTTP_ADDR=0.0.0.0:9000`
    /// overrides `server.http_addr`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Loads `.env` from the working directory or its parents into the
    /// process environment. A missing file is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(ConfigError::env_parse_error(".env", e.to_string())),
        }
        Ok(self)
    }

    /// Loads a specific env file into the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        dotenvy::from_path(path).map_err(|e| {
            if e.not_found() {
                ConfigError::file_not_found(path)
            } else {
                ConfigError::env_parse_error(path.display().to_string(), e.to_string())
            }
        })?;
        Ok(self)
    }

    /// Applies environment overrides, then validates.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed or validation
    /// fails.
    pub fn load(self) -> Result<KeystoneConfig, ConfigError> {
        let vars: Vec<(String, String)> = match &self.env_prefix {
            Some(prefix) => env::vars().filter(|(k, _)| k.starts_with(prefix.as_str())).collect(),
            None => Vec::new(),
        };
        self.load_with_vars(vars)
    }

    /// Like [`load`](Self::load), reading overrides from `vars` instead of
    /// the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed or validation
    /// fails.
    pub fn load_with_vars<I>(mut self, vars: I) -> Result<KeystoneConfig, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if let Some(prefix) = self.env_prefix.take() {
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the merged configuration without environment overrides or
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged layers do not form a configuration.
    pub fn load_unvalidated(self) -> Result<KeystoneConfig, ConfigError> {
        Ok(serde_json::from_value(self.config)?)
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();

        let (path, parsed): (&[&str], Value) = match parts.as_slice() {
            ["SERVER", "HTTP_ADDR"] => (&["server", "http_addr"][..], Value::from(value)),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                (&["server", "shutdown_timeout_secs"][..], parse_integer(key, value)?)
            }
            ["SERVER", "REQUEST_TIMEOUT_MS"] => {
                (&["server", "request_timeout_ms"][..], parse_integer(key, value)?)
            }
            ["SERVER", "MAX_BODY_BYTES"] => {
                (&["server", "max_body_bytes"][..], parse_integer(key, value)?)
            }

            ["ROUTER", "GLOBAL_PREFIX"] => {
                (&["router", "global_prefix"][..], optional_string(value))
            }
            ["ROUTER", "EXPOSE_ERROR_TRACE"] => {
                (&["router", "expose_error_trace"][..], parse_bool_value(key, value)?)
            }
            ["ROUTER", "SOURCE_ROOT"] => (&["router", "source_root"][..], optional_string(value)),
            ["ROUTER", "SOURCE_CONTEXT_LINES"] => {
                (&["router", "source_context_lines"][..], parse_integer(key, value)?)
            }
            ["ROUTER", "DEFAULT_EMPTY_STATUS"] => {
                (&["router", "default_empty_status"][..], parse_integer(key, value)?)
            }

            ["TELEMETRY", "SERVICE_NAME"] => {
                (&["telemetry", "service_name"][..], Value::from(value))
            }
            ["TELEMETRY", "ENVIRONMENT"] => (&["telemetry", "environment"][..], Value::from(value)),
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                (&["telemetry", "logging", "enabled"][..], parse_bool_value(key, value)?)
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => {
                (&["telemetry", "logging", "level"][..], Value::from(value))
            }
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                let format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
                (&["telemetry", "logging", "format"][..], serde_json::to_value(format)?)
            }
            ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
                (&["telemetry", "logging", "include_location"][..], parse_bool_value(key, value)?)
            }
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                (&["telemetry", "metrics", "enabled"][..], parse_bool_value(key, value)?)
            }
            ["TELEMETRY", "METRICS", "ADDR"] => {
                (&["telemetry", "metrics", "addr"][..], optional_string(value))
            }

            _ => {
                tracing::warn!(var = key, "Ignoring unknown configuration variable");
                return Ok(());
            }
        };

        set_path(&mut self.config, path, parsed);
        Ok(())
    }
}

/// Deep-merges `layer` into `base`. Objects merge key by key; any other
/// value replaces what was there.
fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let mut layer = value;
    for key in path.iter().rev() {
        let mut object = serde_json::Map::new();
        object.insert((*key).to_string(), layer);
        layer = Value::Object(object);
    }
    merge(root, layer);
}

fn parse_integer(key: &str, value: &str) -> Result<Value, ConfigError> {
    value
        .parse::<u64>()
        .map(Value::from)
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_bool_value(key: &str, value: &str) -> Result<Value, ConfigError> {
    parse_bool(value)
        .map(Value::Bool)
        .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn optional_string(value: &str) -> Value {
    if value.is_empty() {
        Value::Null
    } else {
        Value::from(value)
    }
}

/// Parses a boolean the way shells spell them.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
