//! Storage layer for the credential record (one TOML file)

use crate::error::ConfigError;
use async_trait::async_trait;
use gpxbot_types::{BotSettings, Credential};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Name of the table holding the credential record
pub const CREDENTIAL_RECORD: &str = "Config";

/// Name of the optional table holding runtime settings
pub const SETTINGS_RECORD: &str = "Settings";

/// Loads and persists the single shared credential record
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Credential, ConfigError>;

    async fn save(&self, credential: &Credential) -> Result<(), ConfigError>;
}

/// Credential store backed by a TOML file
///
/// The credential lives in the `[Config]` table. Other tables (such as
/// `[Settings]`) are left untouched when the credential is saved.
#[derive(Clone, Debug)]
pub struct TomlCredentialStore {
    path: PathBuf,
}

impl TomlCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load runtime settings, falling back to defaults when the table is absent
    pub async fn load_settings(&self) -> Result<BotSettings, ConfigError> {
        let mut table = self.read_table().await?;

        match table.remove(SETTINGS_RECORD) {
            Some(value) => Ok(value.try_into()?),
            None => Ok(BotSettings::default()),
        }
    }

    async fn read_table(&self) -> Result<toml::Table, ConfigError> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        Ok(content.parse::<toml::Table>()?)
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl CredentialStore for TomlCredentialStore {
    async fn load(&self) -> Result<Credential, ConfigError> {
        let mut table = self.read_table().await?;

        let record = table
            .remove(CREDENTIAL_RECORD)
            .ok_or(ConfigError::MissingRecord(CREDENTIAL_RECORD))?;

        Ok(record.try_into()?)
    }

    async fn save(&self, credential: &Credential) -> Result<(), ConfigError> {
        let mut table = match self.read_table().await {
            Ok(table) => table,
            Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                toml::Table::new()
            }
            Err(e) => return Err(e),
        };

        table.insert(
            CREDENTIAL_RECORD.to_string(),
            toml::Value::try_from(credential)?,
        );
        let content = toml::to_string_pretty(&table)?;

        // Write next to the target and rename so a crash never leaves half a file
        let tmp_path = self.path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|source| self.io_error(source))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        debug!(path = %self.path.display(), "Credential record saved");
        Ok(())
    }
}
