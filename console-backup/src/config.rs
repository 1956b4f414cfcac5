use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::api::http::{DEFAULT_AIPLATFORM_URL, DEFAULT_DISCOVERY_URL};
use crate::operation::OperationPoller;
use crate::resources::RestoreContext;
use crate::storage::{FsObjectStore, GcsObjectStore, ObjectStore, StorageError, DEFAULT_GCS_URL};

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const PORT: &str = "PORT";
    pub const PROJECT_ID: &str = "CONSOLE_PROJECT_ID";
    pub const LOCATION: &str = "CONSOLE_LOCATION";
    pub const REASONING_ENGINE_LOCATION: &str = "CONSOLE_REASONING_ENGINE_LOCATION";
    pub const ACCESS_TOKEN: &str = "CONSOLE_ACCESS_TOKEN";
    pub const DISCOVERY_API_URL: &str = "DISCOVERY_API_URL";
    pub const AIPLATFORM_API_URL: &str = "AIPLATFORM_API_URL";
    pub const GCS_API_URL: &str = "GCS_API_URL";
    pub const BACKUP_BUCKET: &str = "BACKUP_BUCKET";
    pub const BACKUP_PREFIX: &str = "BACKUP_PREFIX";
    // When set, snapshots are written to this directory instead of GCS
    pub const BACKUP_LOCAL_DIR: &str = "BACKUP_LOCAL_DIR";
    pub const RESTORE_CREATE_DELAY_MS: &str = "RESTORE_CREATE_DELAY_MS";
    pub const OPERATION_POLL_INTERVAL_MS: &str = "OPERATION_POLL_INTERVAL_MS";
    pub const OPERATION_MAX_POLLS: &str = "OPERATION_MAX_POLLS";
}

/// Default values
pub mod defaults {
    pub const PORT: u16 = 8080;
    pub const LOCATION: &str = "global";
    pub const REASONING_ENGINE_LOCATION: &str = "us-central1";
    pub const BACKUP_BUCKET: &str = "console-backups";
    pub const BACKUP_PREFIX: &str = "backups/";
    pub const RESTORE_CREATE_DELAY_MS: u64 = 500;
    pub const OPERATION_POLL_INTERVAL_MS: u64 = 5000;
    pub const OPERATION_MAX_POLLS: u32 = 360;
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub project_id: Option<String>,
    pub location: String,
    pub reasoning_engine_location: String,
    pub access_token: Option<String>,
    pub discovery_api_url: String,
    pub aiplatform_api_url: String,
    pub gcs_api_url: String,
    pub backup_bucket: String,
    pub backup_prefix: String,
    pub backup_local_dir: Option<String>,
    pub restore_create_delay_ms: u64,
    pub operation_poll_interval_ms: u64,
    pub operation_max_polls: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let number_or = |key: &str, default: u64| {
            get(key)
                .and_then(|v| {
                    v.parse()
                        .map_err(|_| log::warn!("Ignoring invalid {}={}, using {}", key, v, default))
                        .ok()
                })
                .unwrap_or(default)
        };

        Self {
            port: get(env_vars::PORT)
                .unwrap_or_else(|| defaults::PORT.to_string())
                .parse()
                .expect("PORT must be a valid number"),
            project_id: get(env_vars::PROJECT_ID),
            location: string_or(env_vars::LOCATION, defaults::LOCATION),
            reasoning_engine_location: string_or(
                env_vars::REASONING_ENGINE_LOCATION,
                defaults::REASONING_ENGINE_LOCATION,
            ),
            access_token: get(env_vars::ACCESS_TOKEN),
            discovery_api_url: string_or(env_vars::DISCOVERY_API_URL, DEFAULT_DISCOVERY_URL),
            aiplatform_api_url: string_or(env_vars::AIPLATFORM_API_URL, DEFAULT_AIPLATFORM_URL),
            gcs_api_url: string_or(env_vars::GCS_API_URL, DEFAULT_GCS_URL),
            backup_bucket: string_or(env_vars::BACKUP_BUCKET, defaults::BACKUP_BUCKET),
            backup_prefix: string_or(env_vars::BACKUP_PREFIX, defaults::BACKUP_PREFIX),
            backup_local_dir: get(env_vars::BACKUP_LOCAL_DIR),
            restore_create_delay_ms: number_or(
                env_vars::RESTORE_CREATE_DELAY_MS,
                defaults::RESTORE_CREATE_DELAY_MS,
            ),
            operation_poll_interval_ms: number_or(
                env_vars::OPERATION_POLL_INTERVAL_MS,
                defaults::OPERATION_POLL_INTERVAL_MS,
            ),
            operation_max_polls: u32::try_from(number_or(
                env_vars::OPERATION_MAX_POLLS,
                u64::from(defaults::OPERATION_MAX_POLLS),
            ))
            .unwrap_or(defaults::OPERATION_MAX_POLLS),
        }
    }

    /// Scope backups read from and restores write to by default.
    pub fn restore_context(&self) -> Option<RestoreContext> {
        self.project_id
            .as_deref()
            .map(|project| RestoreContext::new(project, &self.location, &self.reasoning_engine_location))
    }

    pub fn create_delay(&self) -> Duration {
        Duration::from_millis(self.restore_create_delay_ms)
    }

    pub fn poller(&self) -> OperationPoller {
        OperationPoller::new(
            Duration::from_millis(self.operation_poll_interval_ms),
            self.operation_max_polls,
        )
    }

    /// Snapshot blob backend: a local directory if configured, GCS otherwise.
    pub fn object_store(&self) -> Result<Arc<dyn ObjectStore>, StorageError> {
        match &self.backup_local_dir {
            Some(dir) => Ok(Arc::new(FsObjectStore::new(dir))),
            None => Ok(Arc::new(GcsObjectStore::new(
                &self.gcs_api_url,
                self.access_token.clone(),
            )?)),
        }
    }
}
