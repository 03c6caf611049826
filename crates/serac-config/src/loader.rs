//! YAML loader with custom tag support
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use secrecy::ExposeSecret;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader resolving tags relative to a config directory
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, for circular include detection
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a new YAML loader for the given config directory
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;

        Ok(Self {
            config_dir,
            secrets,
            include_stack: HashSet::new(),
        })
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!("Loading YAML file: {:?}", path);

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let processed_key = self.process_value(k, source_path)?;
                    let processed_value = self.process_value(v, source_path)?;
                    result.insert(processed_key, processed_value);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => {
                let result: ConfigResult<Vec<Value>> = seq
                    .into_iter()
                    .map(|v| self.process_value(v, source_path))
                    .collect();
                Ok(Value::Sequence(result?))
            }
            _ => Ok(value),
        }
    }

    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        let value = tagged.value;

        trace!("Processing tag '{}'", tag);

        match tag.as_str() {
            "!include" => {
                let include_path = self.value_to_path(&value, source_path)?;
                debug!("Including file: {:?}", include_path);
                self.load_file(&include_path)
            }
            "!secret" => self.process_secret(value),
            "!env_var" => self.process_env_var(value),
            other => Err(ConfigError::InvalidValue {
                key: other.to_string(),
                reason: "unsupported tag".to_string(),
            }),
        }
    }

    fn process_secret(&self, value: Value) -> ConfigResult<Value> {
        let Value::String(key) = value else {
            return Err(ConfigError::InvalidValue {
                key: "!secret".to_string(),
                reason: "secret key must be a string".to_string(),
            });
        };

        let secret = self.secrets.get(&key)?;
        debug!("Substituted secret: {}", key);
        Ok(Value::String(secret.expose_secret().to_string()))
    }

    fn process_env_var(&self, value: Value) -> ConfigResult<Value> {
        let Value::String(var_name) = value else {
            return Err(ConfigError::InvalidValue {
                key: "!env_var".to_string(),
                reason: "environment variable name must be a string".to_string(),
            });
        };

        let env_value = std::env::var(&var_name).map_err(|_| ConfigError::EnvVarNotFound {
            var: var_name.clone(),
        })?;

        debug!("Substituted env var: {}", var_name);
        Ok(Value::String(env_value))
    }

    /// Resolve an include path relative to the including file
    fn value_to_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(path_str) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{:?}", value),
                reason: "path must be a string".to_string(),
            });
        };

        let base_dir = source_path.parent().unwrap_or(&self.config_dir);
        let path = Path::new(path_str);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        })
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

/// Load a YAML file with full tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    let mut loader = YamlLoader::new(config_dir)?;
    loader.load_file(file)
}
