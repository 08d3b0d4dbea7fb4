//! Layered platform configuration.
//!
//! Configuration is parsed once at process start from three layers, later
//! layers overriding earlier ones: built-in defaults, an optional TOML
//! file, and `TALLY_*` environment variables (`__` separates nesting, so
//! `TALLY_DATABASE__POOL_SIZE=4` sets `database.pool_size`). The resulting
//! [`PlatformConfig`] is immutable and owned by the resource registry;
//! everything downstream reads it, nothing mutates it.

use crate::error::ConfigurationError;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Built-in defaults, the bottom configuration layer.
///
/// Credentials default to empty on purpose: validation rejects them before
/// any pool is opened unless a file or the environment supplies real ones.
const DEFAULTS: &str = r#"
[server]
test_mode = false
shutdown_drain_timeout_secs = 10

[database]
url = ""
username = ""
password = ""
pool_size = 10
connect_timeout_secs = 5
acquire_timeout_secs = 10

[extensions]
enabled = true
bundle_dir = "extensions"

[naming]
export = true
"#;

/// Database connection settings for one logical subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL (e.g. `postgres://localhost:5432/tally`)
    #[serde(default)]
    pub url: String,

    /// Login role
    #[serde(default)]
    pub username: String,

    /// Login credential
    #[serde(default)]
    pub password: String,

    /// Maximum connections held by the pool
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Bound on establishing a single connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Bound on borrowing a connection from the pool
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

const fn default_pool_size() -> u32 {
    10
}

const fn default_connect_timeout() -> u64 {
    5
}

const fn default_acquire_timeout() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Check that every setting a pool cannot be built without is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] naming the first missing or invalid
    /// key, prefixed with `key_prefix` (`database`, `extensions.database`).
    pub fn validate_at(&self, key_prefix: &str) -> Result<(), ConfigurationError> {
        let required = [
            ("url", &self.url),
            ("username", &self.username),
            ("password", &self.password),
        ];
        for (key, value) in required {
            if value.is_empty() {
                return Err(ConfigurationError::MissingSetting {
                    key: format!("{key_prefix}.{key}"),
                });
            }
        }
        if self.pool_size == 0 {
            return Err(ConfigurationError::InvalidSetting {
                key: format!("{key_prefix}.pool_size"),
                reason: "pool must allow at least one connection".to_string(),
            });
        }
        Ok(())
    }

    /// Bound on establishing a single connection.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Bound on borrowing a connection from the pool.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Process-level server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Selects the controllable clock instead of the wall clock.
    #[serde(default)]
    pub test_mode: bool,

    /// Per-resource bound on draining a pool at shutdown.
    #[serde(default = "default_drain_timeout")]
    pub shutdown_drain_timeout_secs: u64,
}

const fn default_drain_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            shutdown_drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl ServerConfig {
    /// Per-resource drain bound as a [`Duration`].
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_timeout_secs)
    }
}

/// Extension subsystem settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSettings {
    /// Whether the extension host is brought up at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory scanned for extension bundles.
    #[serde(default = "default_bundle_dir")]
    pub bundle_dir: String,

    /// Dedicated connection settings. When absent the host reuses the
    /// primary database settings but still gets its own pool.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

const fn default_true() -> bool {
    true
}

fn default_bundle_dir() -> String {
    "extensions".to_string()
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bundle_dir: default_bundle_dir(),
            database: None,
        }
    }
}

impl ExtensionSettings {
    /// The connection settings the host's dedicated pool is built from.
    #[must_use]
    pub fn database_or<'a>(&'a self, primary: &'a DatabaseConfig) -> &'a DatabaseConfig {
        self.database.as_ref().unwrap_or(primary)
    }
}

/// Naming/lookup service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Whether the resource directory is exported for external lookup.
    #[serde(default = "default_true")]
    pub export: bool,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self { export: true }
    }
}

/// Fully parsed platform configuration.
///
/// Created once at process start, read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Process-level server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Primary database settings (also used for the authorization pool)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Extension subsystem settings
    #[serde(default)]
    pub extensions: ExtensionSettings,

    /// Naming service settings
    #[serde(default)]
    pub naming: NamingConfig,
}

impl PlatformConfig {
    /// Load configuration from defaults, an optional TOML file, and the
    /// process environment (in that order of precedence, lowest first).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if a layer cannot be read or a
    /// required setting is missing after all layers are applied.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigurationError> {
        Self::load_with_env(
            file,
            Environment::with_prefix("TALLY")
                .separator("__")
                .try_parsing(true),
        )
    }

    /// [`load`](Self::load) with an explicit environment source.
    ///
    /// Tests inject a fake environment map here instead of mutating the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if a layer cannot be read or a
    /// required setting is missing after all layers are applied.
    pub fn load_with_env(
        file: Option<&Path>,
        env: Environment,
    ) -> Result<Self, ConfigurationError> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULTS, FileFormat::Toml));
        if let Some(path) = file {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        let layered = builder.add_source(env).build()?;
        let parsed: Self = layered.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Check every section for settings the bootstrap cannot proceed
    /// without.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.database.validate_at("database")?;
        if self.extensions.enabled {
            if let Some(db) = &self.extensions.database {
                db.validate_at("extensions.database")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)] // Test code: fixture setup should not fail

    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_from(pairs: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Environment::with_prefix("TALLY")
            .separator("__")
            .try_parsing(true)
            .source(Some(map))
    }

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_alone_fail_on_missing_credentials() {
        let result = PlatformConfig::load_with_env(None, env_from(&[]));
        match result {
            Err(ConfigurationError::MissingSetting { key }) => {
                assert_eq!(key, "database.url");
            }
            other => panic!("expected MissingSetting, got {other:?}"),
        }
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let file = config_file(
            r#"
            [database]
            url = "postgres://db.internal:5432/tally"
            username = "tally"
            password = "secret"
            pool_size = 3
            "#,
        );

        let config = PlatformConfig::load_with_env(Some(file.path()), env_from(&[])).unwrap();
        assert_eq!(config.database.url, "postgres://db.internal:5432/tally");
        assert_eq!(config.database.pool_size, 3);
        // Untouched keys keep their defaults
        assert_eq!(config.database.connect_timeout_secs, 5);
        assert!(!config.server.test_mode);
    }

    #[test]
    fn environment_layer_overrides_file() {
        let file = config_file(
            r#"
            [database]
            url = "postgres://db.internal:5432/tally"
            username = "tally"
            password = "secret"
            pool_size = 3
            "#,
        );

        let config = PlatformConfig::load_with_env(
            Some(file.path()),
            env_from(&[
                ("TALLY_DATABASE__POOL_SIZE", "7"),
                ("TALLY_SERVER__TEST_MODE", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(config.database.pool_size, 7);
        assert!(config.server.test_mode);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let file = config_file(
            r#"
            [database]
            url = "postgres://localhost/tally"
            username = "tally"
            password = "secret"
            pool_size = 0
            "#,
        );

        let result = PlatformConfig::load_with_env(Some(file.path()), env_from(&[]));
        match result {
            Err(ConfigurationError::InvalidSetting { key, .. }) => {
                assert_eq!(key, "database.pool_size");
            }
            other => panic!("expected InvalidSetting, got {other:?}"),
        }
    }

    #[test]
    fn extension_settings_fall_back_to_primary_database() {
        let primary = DatabaseConfig {
            url: "postgres://localhost/tally".to_string(),
            username: "tally".to_string(),
            password: "secret".to_string(),
            ..DatabaseConfig::default()
        };
        let settings = ExtensionSettings::default();
        assert_eq!(settings.database_or(&primary), &primary);

        let dedicated = DatabaseConfig {
            url: "postgres://localhost/tally_ext".to_string(),
            ..primary.clone()
        };
        let settings = ExtensionSettings {
            database: Some(dedicated.clone()),
            ..ExtensionSettings::default()
        };
        assert_eq!(settings.database_or(&primary), &dedicated);
    }

    #[test]
    fn dedicated_extension_database_is_validated() {
        let config = PlatformConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/tally".to_string(),
                username: "tally".to_string(),
                password: "secret".to_string(),
                ..DatabaseConfig::default()
            },
            extensions: ExtensionSettings {
                database: Some(DatabaseConfig::default()),
                ..ExtensionSettings::default()
            },
            ..PlatformConfig::default()
        };

        match config.validate() {
            Err(ConfigurationError::MissingSetting { key }) => {
                assert_eq!(key, "extensions.database.url");
            }
            other => panic!("expected MissingSetting, got {other:?}"),
        }
    }
}
