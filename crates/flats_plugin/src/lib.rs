//! # Flats
//!
//! Named, claimable flats (apartments) for game servers, built on
//! [`flats_core`].
//!
//! Administrators mark cuboid areas with the selection wand and group them
//! into flats. Players claim a flat, trust friends with it, and everybody
//! else is kept from building, breaking or blowing things up inside.
//!
//! ## Modules
//!
//! - [`volumes`] - areas, selections and flats
//! - [`cache`] - the flat registry and its spatial index
//! - [`storage`] - JSON persistence
//! - [`listeners`] / [`commands`] - the plugin's event handlers and `/flats`
//! - [`plugin`] - enabling and disabling on a [`flats_core::Core`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flats_core::Core;
//! use flats_plugin::{FlatsPlugin, RecordingHost};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let core = Core::default();
//! let plugin = FlatsPlugin::enable(&core, Path::new("data"), Arc::new(RecordingHost::new())).await?;
//! core.tick();
//! plugin.disable(&core)?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod commands;
pub mod context;
pub mod error;
pub mod events;
pub mod host;
pub mod i18n;
pub mod listeners;
pub mod permissions;
pub mod plugin;
pub mod schedulers;
pub mod settings;
pub mod storage;
pub mod volumes;

pub use cache::FlatsCache;
pub use context::{FlatsContext, KnownPlayers};
pub use error::{CacheError, ConfigError, LocationParseError, PluginError, PluginResult, StorageError};
pub use host::{HostCall, HostGateway, ItemStack, RecordingHost};
pub use i18n::I18n;
pub use permissions::{Feature, Permissions};
pub use plugin::FlatsPlugin;
pub use settings::{GameMode, Settings};
pub use storage::{FlatsSnapshot, FlatsStorage, JsonFlatsStorage, SaveOutcome};
pub use volumes::{Area, Flat, Selection};
