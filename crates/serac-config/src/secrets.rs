//! secrets.yaml store
//!
//! Values are kept as [`SecretString`] so they never show up in debug output.

use crate::error::{ConfigError, ConfigResult};
use secrecy::SecretString;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Secrets loaded from secrets.yaml
#[derive(Debug, Clone)]
pub struct Secrets {
    secrets: HashMap<String, SecretString>,
    path: PathBuf,
}

impl Secrets {
    /// Load secrets from `<config_dir>/secrets.yaml`; a missing file is empty
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join("secrets.yaml");

        if !path.exists() {
            debug!("No secrets.yaml found at {:?}, using empty secrets", path);
            return Ok(Self {
                secrets: HashMap::new(),
                path,
            });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        let raw: HashMap<String, serde_yaml::Value> =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseYaml {
                path: path.clone(),
                source: e,
            })?;

        let mut secrets = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let text = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key,
                        reason: "secrets must be scalars".to_string(),
                    })
                }
            };
            secrets.insert(key, SecretString::from(text));
        }

        debug!("Loaded {} secrets from {:?}", secrets.len(), path);
        Ok(Self { secrets, path })
    }

    /// Get a secret by key
    pub fn get(&self, key: &str) -> ConfigResult<&SecretString> {
        self.secrets
            .get(key)
            .ok_or_else(|| ConfigError::SecretNotFound {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.secrets.contains_key(key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl Default for Secrets {
    fn default() -> Self {
        Self {
            secrets: HashMap::new(),
            path: PathBuf::from("secrets.yaml"),
        }
    }
}
