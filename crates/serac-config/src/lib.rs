//! YAML configuration loading for Serac
//!
//! Reads `serac.yaml` from a config directory. The file may use:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use serac_config::SeracConfig;
//!
//! let config = SeracConfig::load("/etc/serac")?;
//! for location in &config.locations {
//!     println!("{} -> {}", location.location_name, location.key());
//! }
//! ```

mod error;
mod loader;
mod secrets;
mod serac_config;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;
pub use serac_config::{LocationConfig, LoggingConfig, PollingConfig, SeracConfig, CONFIG_FILE};
