//! Daemon configuration: defaults, `core.conf`, and command-line overrides.
//!
//! The merged result is a flat string mapping. Typed accessors parse values on
//! demand and fall back to the built-in default (with a warning) when a value
//! cannot be parsed.
//!
//! CHANGELOG:
//! - 10/16/2026 - Legacy section migration, typed accessors
//! - 10/14/2026 - Initial implementation

pub mod ini;
pub mod legacy;
pub mod loader;

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use loader::{load, CliOverrides, LoadedConfig};

/// Name of the canonical config section (and of the daemon itself).
pub const CANONICAL_SECTION: &str = "core-daemon";

/// Config file read when `-f` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/core/core.conf";

/// Default control port of the CORE API.
pub const DEFAULT_PORT: u16 = 4038;

/// Built-in defaults. Every recognized option appears here.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("port", "4038"),
    ("listenaddr", "localhost"),
    ("pidfile", "/var/run/core-daemon.pid"),
    ("logfile", "/var/log/core-daemon.log"),
    ("xmlfilever", "1.0"),
    ("numthreads", "1"),
    ("verbose", "False"),
    ("daemonize", "False"),
    ("debug", "False"),
    ("execfile", ""),
    ("aux_request_handler", ""),
];

/// Errors in interpreting configuration values.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for option `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("aux_request_handler {0:?} must look like `<handler>:<port>`")]
    BadAuxSpec(String),
}

/// Merged configuration mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl Config {
    /// Raw string value of an option.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Overwrite (or add) an option.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Value of an option that may be unset (empty string counts as unset).
    pub fn optional(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Listen address; an empty value means `localhost`.
    pub fn listen_addr(&self) -> &str {
        self.optional("listenaddr").unwrap_or("localhost")
    }

    pub fn port(&self) -> u16 {
        self.parsed_or_default("port", DEFAULT_PORT)
    }

    pub fn num_threads(&self) -> usize {
        self.parsed_or_default("numthreads", 1)
    }

    pub fn xml_file_version(&self) -> &str {
        self.optional("xmlfilever").unwrap_or("1.0")
    }

    pub fn pidfile(&self) -> PathBuf {
        self.path_or_default("pidfile")
    }

    pub fn logfile(&self) -> PathBuf {
        self.path_or_default("logfile")
    }

    /// Pin `pidfile` and `logfile` to absolute paths.
    ///
    /// Detaching changes the working directory to `/`; relative paths must be
    /// resolved against the directory the daemon was started from first.
    pub fn resolve_paths(&mut self) -> io::Result<()> {
        for key in ["pidfile", "logfile"] {
            let path = std::path::absolute(self.path_or_default(key))?;
            self.set(key, path.to_string_lossy().into_owned());
        }
        Ok(())
    }

    /// Session file to hand to a running daemon, if any.
    pub fn execfile(&self) -> Option<PathBuf> {
        self.optional("execfile").map(expand_path)
    }

    pub fn daemonize(&self) -> bool {
        self.flag("daemonize")
    }

    pub fn verbose(&self) -> bool {
        self.flag("verbose")
    }

    pub fn debug(&self) -> bool {
        self.flag("debug")
    }

    /// Boolean option. Unparseable values are treated as `false`.
    pub fn flag(&self, key: &str) -> bool {
        self.try_flag(key).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "using default for option");
            false
        })
    }

    /// Boolean option without the fallback; an unset option is `false`.
    pub fn try_flag(&self, key: &str) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(raw) => parse_bool(raw).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: "expected true/false, yes/no, on/off or 1/0".to_string(),
            }),
            None => Ok(false),
        }
    }

    /// Parsed auxiliary handler spec, if configured.
    pub fn aux_handler(&self) -> Result<Option<AuxHandlerSpec>, ConfigError> {
        self.optional("aux_request_handler")
            .map(AuxHandlerSpec::parse)
            .transpose()
    }

    fn parsed_or_default<T: std::str::FromStr>(&self, key: &str, default: T) -> T
    where
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.optional(key) else {
            return default;
        };
        match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                let err = ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(error = %err, "using default for option");
                default
            }
        }
    }

    fn path_or_default(&self, key: &str) -> PathBuf {
        let default = DEFAULTS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .unwrap_or_default();
        expand_path(self.optional(key).unwrap_or(default))
    }
}

/// `<handler key>:<port>` from `aux_request_handler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxHandlerSpec {
    pub handler: String,
    pub port: u16,
}

impl AuxHandlerSpec {
    /// Split at the last colon; the handler key itself may contain dots.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (handler, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::BadAuxSpec(raw.to_string()))?;
        let handler = handler.trim();
        if handler.is_empty() {
            return Err(ConfigError::BadAuxSpec(raw.to_string()));
        }
        let port = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::BadAuxSpec(raw.to_string()))?;
        Ok(Self {
            handler: handler.to_string(),
            port,
        })
    }
}

/// ConfigParser-style boolean.
pub fn parse_bool(raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: "boolean".to_string(),
            value: other.to_string(),
            reason: "expected true/false, yes/no, on/off or 1/0".to_string(),
        }),
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
