//! Backup and restore for agent platform console resources.
//!
//! - [`backup::builder`] snapshots the live resource graph
//! - [`backup::store`] keeps snapshots as JSON blobs in object storage
//! - [`backup::selection`] and [`backup::plan`] turn operator toggles into an
//!   ordered restore plan
//! - [`backup::restore`] replays the plan against a (possibly different) project

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

pub mod api;
pub mod backup;
pub mod config;
pub mod controllers;
pub mod operation;
pub mod resources;
pub mod secrets;
pub mod storage;

use api::ResourceApi;
use backup::SnapshotStore;
use config::Config;
use resources::RestoreContext;

pub struct AppState {
    pub config: Config,
    pub api: Arc<dyn ResourceApi>,
    pub store: Arc<SnapshotStore>,
    /// Default scope for backups and restores
    pub context: RestoreContext,
    /// Snapshot name → start time of the restore currently running from it
    pub restores_in_flight: Arc<DashMap<String, DateTime<Utc>>>,
}
