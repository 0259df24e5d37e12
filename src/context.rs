use crate::config::{load_settings_file, EngineSettings};
use crate::database::Database;
use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;

/// Shared handles for one CLI invocation: the store and the parsed settings.
#[derive(Clone)]
pub struct AppContext {
    db: Database,
    engine_settings: EngineSettings,
}

impl AppContext {
    /// Settings come from the store first; the config file overrides them.
    pub async fn initialize(database_url: &str, config_path: Option<&Path>) -> Result<Self> {
        let db = Database::new(database_url).await?;
        let mut settings = db
            .get_all_settings()
            .await
            .context("Failed to load settings from database")?;
        debug!("Loaded {} settings from database", settings.len());

        if let Some(path) = config_path {
            let overrides = load_settings_file(path)?;
            info!(
                "Applying {} settings from {}",
                overrides.len(),
                path.display()
            );
            settings.extend(overrides);
        }

        let engine_settings = EngineSettings::from_settings_map(&settings)?;
        Ok(Self {
            db,
            engine_settings,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn engine_settings(&self) -> &EngineSettings {
        &self.engine_settings
    }
}
