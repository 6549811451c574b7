use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::session::{FlushMode, TransactionIsolation};

/// Looked up next to the executable when no explicit file is given.
pub const DEFAULT_CONFIG_FILE: &str = "tracky.toml";

/// Where [`Settings`] come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// `tracky.toml` in the application base directory. May be absent.
    #[default]
    DefaultFile,
    /// An explicitly named file. Must exist.
    File(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub sqlx_logging: bool,
    pub run_migrations: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://tracky.sqlite?mode=rwc".to_string(),
            max_connections: 10,
            connect_timeout_secs: 8,
            sqlx_logging: false,
            run_migrations: true,
        }
    }
}

impl DatabaseSettings {
    /// In-memory SQLite databases live and die with a single connection.
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Flush policy applied to every session opened by the unit-of-work factory.
    pub flush_mode: FlushMode,
    /// Isolation level used by `UnitOfWork::begin_transaction`. `None` keeps
    /// the database default.
    pub isolation_level: Option<TransactionIsolation>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Commit,
            isolation_level: None,
        }
    }
}

impl Settings {
    /// Layers defaults, the config file, `TRACKY__SECTION__KEY` variables and
    /// finally `DATABASE_URL`.
    pub fn load(source: &ConfigSource) -> Result<Self> {
        dotenvy::dotenv().ok();

        let base = base_directory();
        let (path, required) = match source {
            ConfigSource::DefaultFile => (resolve_config_path(Path::new(DEFAULT_CONFIG_FILE), &base), false),
            ConfigSource::File(path) => (resolve_config_path(path, &base), true),
        };

        let mut builder = Config::builder();
        if path.is_file() {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path.as_path()));
        } else if required {
            return Err(AppError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        } else {
            warn!(path = %path.display(), "No configuration file found, using defaults");
        }

        let mut settings: Settings = builder
            .add_source(Environment::with_prefix("TRACKY").separator("__"))
            .build()?
            .try_deserialize()?;

        if let Ok(url) = env::var("DATABASE_URL") {
            settings.database.url = url;
        }

        info!(flush_mode = ?settings.session.flush_mode, "Configuration loaded");
        Ok(settings)
    }
}

/// Relative paths are taken from `base`; absolute paths are used as given.
pub fn resolve_config_path(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Directory holding the running executable, or the working directory when
/// that cannot be determined.
pub fn base_directory() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_relative_config_path_resolves_against_base() {
        let resolved = resolve_config_path(Path::new("tracky.toml"), Path::new("/opt/tracky"));
        assert_eq!(resolved, PathBuf::from("/opt/tracky/tracky.toml"));
    }

    #[test]
    fn test_absolute_config_path_is_kept() {
        let resolved = resolve_config_path(Path::new("/etc/tracky.toml"), Path::new("/opt/tracky"));
        assert_eq!(resolved, PathBuf::from("/etc/tracky.toml"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let source = ConfigSource::File(env::temp_dir().join("tracky-does-not-exist.toml"));
        let err = Settings::load(&source).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_missing_default_file_falls_back_to_defaults() {
        let settings = Settings::load(&ConfigSource::DefaultFile).expect("defaults should load");
        assert_eq!(settings.session, SessionSettings::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = env::temp_dir().join(format!("tracky-config-{}.toml", std::process::id()));
        fs::write(
            &path,
            r#"
[database]
max_connections = 3
run_migrations = false

[session]
flush_mode = "auto"
isolation_level = "serializable"
"#,
        )
        .unwrap();

        let settings = Settings::load(&ConfigSource::File(path.clone())).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(settings.database.max_connections, 3);
        assert!(!settings.database.run_migrations);
        assert_eq!(settings.session.flush_mode, FlushMode::Auto);
        assert_eq!(settings.session.isolation_level, Some(TransactionIsolation::Serializable));
    }

    #[test]
    fn test_in_memory_detection() {
        let mut database = DatabaseSettings::default();
        assert!(!database.is_in_memory());
        database.url = "sqlite::memory:".to_string();
        assert!(database.is_in_memory());
    }
}
