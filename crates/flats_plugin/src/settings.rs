//! Plugin settings stored as `settings.toml` in the data directory.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

pub const SETTINGS_FILE: &str = "settings.toml";

/// Game modes the host can put a player in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameMode::Survival => "survival",
            GameMode::Creative => "creative",
            GameMode::Adventure => "adventure",
            GameMode::Spectator => "spectator",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Translation table, e.g. `en_us` or `de_de`.
    pub language: String,
    /// Seconds between automatic saves; zero or less disables them.
    pub auto_save_interval: i64,
    /// Largest selection, in blocks, that can become an area.
    pub max_flat_size: u64,
    /// Flats a non-admin player may own at once.
    pub max_claimable_flats: usize,
    pub enable_auto_gamemode: bool,
    pub inside_flat_gamemode: GameMode,
    pub outside_flat_gamemode: GameMode,
    /// Gate every feature behind its own permission node.
    pub advanced_permissions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: "en_us".to_string(),
            auto_save_interval: 300,
            max_flat_size: 10_000,
            max_claimable_flats: 1,
            enable_auto_gamemode: false,
            inside_flat_gamemode: GameMode::Survival,
            outside_flat_gamemode: GameMode::Adventure,
            advanced_permissions: false,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, writing the defaults there first if the
    /// file does not exist yet.
    pub async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
            let settings: Settings =
                toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
            settings.validate().map_err(ConfigError::Invalid)?;
            Ok(settings)
        } else {
            let defaults = Settings::default();
            let toml_content = toml::to_string_pretty(&defaults)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ConfigError::Write(parent.to_path_buf(), e))?;
            }
            tokio::fs::write(path, toml_content)
                .await
                .map_err(|e| ConfigError::Write(path.to_path_buf(), e))?;
            info!("Created default settings file: {}", path.display());
            Ok(defaults)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.language.trim().is_empty() {
            return Err("language cannot be empty".to_string());
        }
        if self.max_flat_size == 0 {
            return Err("max_flat_size must be at least 1".to_string());
        }
        Ok(())
    }

    /// Auto-save period in ticks, or `None` when auto-save is disabled.
    pub fn auto_save_period(&self) -> Option<u64> {
        u64::try_from(self.auto_save_interval)
            .ok()
            .filter(|seconds| *seconds > 0)
            .map(|seconds| seconds.saturating_mul(flats_core::TICKS_PER_SECOND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        let settings = Settings::load_from_file(&path).await.unwrap();
        assert_eq!(settings, Settings::default());
        assert!(path.exists());

        let reloaded = Settings::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, settings);
    }

    #[tokio::test]
    async fn partial_files_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        tokio::fs::write(&path, "language = \"de_de\"\ninside_flat_gamemode = \"creative\"\n")
            .await
            .unwrap();

        let settings = Settings::load_from_file(&path).await.unwrap();
        assert_eq!(settings.language, "de_de");
        assert_eq!(settings.inside_flat_gamemode, GameMode::Creative);
        assert_eq!(settings.max_flat_size, 10_000);
    }

    #[tokio::test]
    async fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        tokio::fs::write(&path, "max_flat_size = 0\n").await.unwrap();
        assert!(matches!(
            Settings::load_from_file(&path).await,
            Err(ConfigError::Invalid(_))
        ));

        tokio::fs::write(&path, "outside_flat_gamemode = \"hardcore\"\n")
            .await
            .unwrap();
        assert!(matches!(
            Settings::load_from_file(&path).await,
            Err(ConfigError::Parse(_, _))
        ));
    }

    #[test]
    fn non_positive_interval_disables_auto_save() {
        let mut settings = Settings::default();
        assert_eq!(settings.auto_save_period(), Some(6000));
        settings.auto_save_interval = 0;
        assert_eq!(settings.auto_save_period(), None);
        settings.auto_save_interval = -5;
        assert_eq!(settings.auto_save_period(), None);
        settings.auto_save_interval = i64::MAX;
        assert_eq!(settings.auto_save_period(), Some(u64::MAX));
    }
}
