//! Bridge configuration: library search paths and call serialization.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{ExtopError, ExtopResult};

/// Path to a JSON file holding a [`BridgeConfig`].
pub const ENV_CONFIG: &str = "GLLM_EXTOP_CONFIG";
/// Library path tried before every configured path.
pub const ENV_LIB: &str = "GLLM_EXTOP_LIB";
/// `0`/`1` override of [`BridgeConfig::serialize_calls`].
pub const ENV_SERIALIZE: &str = "GLLM_EXTOP_SERIALIZE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Candidate library paths, tried in order.
    pub library_paths: Vec<PathBuf>,
    /// Run each fallible foreign call and its last-error read under one
    /// bridge-wide lock.
    pub serialize_calls: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            library_paths: default_library_paths(),
            serialize_calls: true,
        }
    }
}

#[cfg(target_os = "windows")]
fn default_library_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("extop_ref.dll")]
}

#[cfg(target_os = "macos")]
fn default_library_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./libextop_ref.dylib"),
        PathBuf::from("libextop_ref.dylib"),
    ]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn default_library_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./libextop_ref.so"),
        PathBuf::from("libextop_ref.so"),
    ]
}

impl BridgeConfig {
    /// Build the configuration from the process environment.
    ///
    /// Problems with the config file are logged and the defaults are used.
    pub fn from_env() -> Self {
        let base = match std::env::var(ENV_CONFIG) {
            Ok(path) => match Self::load_file(&path) {
                Ok(cfg) => {
                    log::debug!("Loaded bridge config from: {path}");
                    cfg
                }
                Err(e) => {
                    log::warn!("Ignoring bridge config {path}: {e}");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        base.with_overrides(
            std::env::var(ENV_LIB).ok().as_deref(),
            std::env::var(ENV_SERIALIZE).ok().as_deref(),
        )
    }

    pub fn load_file(path: impl AsRef<Path>) -> ExtopResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExtopError::InvalidArgument(format!("read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> ExtopResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ExtopError::InvalidArgument(format!("bridge config: {e}")))
    }

    /// Apply the values of [`ENV_LIB`] and [`ENV_SERIALIZE`].
    pub fn with_overrides(mut self, library: Option<&str>, serialize: Option<&str>) -> Self {
        if let Some(lib) = library.filter(|s| !s.is_empty()) {
            self.library_paths.insert(0, PathBuf::from(lib));
        }
        if let Some(raw) = serialize {
            match parse_flag(raw) {
                Some(flag) => self.serialize_calls = flag,
                None => log::warn!("Ignoring {ENV_SERIALIZE}={raw}: expected 0 or 1"),
            }
        }
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
