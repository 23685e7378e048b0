//! Error types for the Flats plugin

use std::{io::Error as IoError, path::PathBuf};
use thiserror::Error;

/// Flat persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create data directory {0}: {1}")]
    DirectoryCreate(PathBuf, IoError),

    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to create file {0}: {1}")]
    FileCreate(PathBuf, IoError),

    #[error("Failed to write to file {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to sync file {0}: {1}")]
    FileSync(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),

    #[error("Failed to serialize flats: {0}")]
    Serialization(serde_json::Error),

    #[error("Failed to deserialize file {0}: {1}")]
    Deserialization(PathBuf, serde_json::Error),
}

/// Settings file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings {0}: {1}")]
    Read(PathBuf, IoError),

    #[error("Failed to write settings {0}: {1}")]
    Write(PathBuf, IoError),

    #[error("Failed to parse settings {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Malformed `world:x1,y1,z1;x2,y2,z2` strings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationParseError {
    #[error("Location string '{0}' must have the form world:x1,y1,z1;x2,y2,z2")]
    Malformed(String),

    #[error("Coordinate '{value}' in '{input}' is not a whole number")]
    InvalidCoordinate { input: String, value: String },
}

/// Flats registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("A flat named '{0}' already exists")]
    AlreadyExists(String),

    #[error("No flat exists with the name '{0}'")]
    NotFound(String),

    #[error("An area of flat '{name}' covers {cells} grid cells")]
    AreaTooLarge { name: String, cells: u64 },
}

/// Top-level plugin errors
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Flats error: {0}")]
    Cache(#[from] CacheError),

    #[error("Task error: {0}")]
    Task(#[from] flats_core::TaskError),

    #[error("The auto-save scheduler is already running")]
    AutoSaveRunning,
}

pub type StorageResult<T> = Result<T, StorageError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type PluginResult<T> = Result<T, PluginError>;
