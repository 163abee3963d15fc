//! Settings read with the `config` crate: built-in defaults, then an optional
//! `fcdb.toml` (or an explicit file), then `FCDB__SECTION__KEY` variables.
use std::path::Path;

use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;

use crate::error::Result;
use crate::persist::PersistenceMode;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseSettings {
    /// `None` keeps the store in memory.
    pub path: Option<String>,
    pub foreign_keys: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogSettings {
    /// An `EnvFilter` directive for hosts that install a subscriber.
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database: DatabaseSettings {
                path: None,
                foreign_keys: false,
            },
            log: LogSettings { filter: "info".into() },
        }
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        .set_default("database.foreign_keys", false)?
        .set_default("log.filter", "info")?)
}

fn environment() -> Environment {
    Environment::with_prefix("FCDB").prefix_separator("__").separator("__")
}

impl Settings {
    /// Reads `fcdb.toml` from the working directory when present.
    pub fn load() -> Result<Settings> {
        let settings = defaults()?
            .add_source(File::with_name("fcdb").required(false))
            .add_source(environment())
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Settings> {
        let settings = defaults()?
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(environment())
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Settings from TOML text alone, without the environment.
    pub fn from_toml(text: &str) -> Result<Settings> {
        let settings = defaults()?.add_source(File::from_str(text, FileFormat::Toml)).build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        match &self.database.path {
            Some(path) => PersistenceMode::File(path.clone()),
            None => PersistenceMode::InMemory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_the_store_in_memory() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.persistence_mode(), PersistenceMode::InMemory);
    }

    #[test]
    fn file_values_override_defaults() {
        let settings = Settings::from_toml(
            r#"
            [database]
            path = "fc.db"
            foreign_keys = true
            "#,
        )
        .unwrap();
        assert!(settings.database.foreign_keys);
        assert_eq!(settings.persistence_mode(), PersistenceMode::File("fc.db".into()));
        assert_eq!(settings.log.filter, "info");
    }
}
