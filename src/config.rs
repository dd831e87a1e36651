//! Configuration management using the prefer crate.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmConfig;

/// Environment variables checked, in order, for the completion API key.
pub const API_KEY_VARS: &[&str] = &["TABLEQUERY_API_KEY", "OPENAI_API_KEY"];

/// Default number of SQL generation attempts per question.
pub const DEFAULT_MAX_SQL_ATTEMPTS: u32 = 5;

/// Configuration problems that must stop the program at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No database path configured")]
    MissingDatabasePath,

    #[error("No API key configured for remote completion endpoint {0}")]
    MissingCredential(String),

    #[error("Invalid completion endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename, relative to the data directory.
    pub database_filename: String,
    /// Directory for processed documents and artifacts.
    pub output_dir: PathBuf,
    /// Maximum SQL generation attempts per question.
    pub max_sql_attempts: u32,
    /// Whether chat may return INSERT/UPDATE/DELETE statements.
    pub allow_mutations: bool,
    /// Completion service settings.
    pub llm: LlmConfig,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("tablequery");

        Self {
            output_dir: data_dir.join("output"),
            data_dir,
            database_filename: "tables.db".to_string(),
            max_sql_attempts: DEFAULT_MAX_SQL_ATTEMPTS,
            allow_mutations: false,
            llm: LlmConfig::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            output_dir: data_dir.join("output"),
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Fill the API key from the environment when the config has none.
    pub fn apply_env(&mut self) {
        if self.llm.api_key.is_some() {
            return;
        }
        self.llm.api_key = API_KEY_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.trim().is_empty());
    }

    /// Reject configurations the program cannot run with.
    ///
    /// A remote completion endpoint needs an API key; local endpoints do not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_filename.trim().is_empty() || self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingDatabasePath);
        }
        if self.llm.enabled {
            url::Url::parse(&self.llm.endpoint)
                .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {}", self.llm.endpoint, e)))?;
            if !self.llm.is_local() && self.llm.api_key.is_none() {
                return Err(ConfigError::MissingCredential(self.llm.endpoint.clone()));
            }
        }
        Ok(())
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    /// Output directory for processed documents.
    #[serde(default)]
    pub output_dir: Option<String>,
    /// Maximum SQL generation attempts.
    #[serde(default)]
    pub max_sql_attempts: Option<u32>,
    /// Allow mutating statements from chat.
    #[serde(default)]
    pub allow_mutations: Option<bool>,
    /// Completion service configuration.
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers tablequery config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("tablequery").await {
            Ok(pref_config) => {
                Self::from_prefer(&pref_config)
            }
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Read known keys from a loaded prefer configuration.
    /// Missing or mistyped keys fall back to defaults.
    pub fn from_prefer(pref_config: &prefer::Config) -> Self {
        Config {
            target: pref_config.get("target").ok(),
            database: pref_config.get("database").ok(),
            output_dir: pref_config.get("output_dir").ok(),
            max_sql_attempts: pref_config.get("max_sql_attempts").ok(),
            allow_mutations: pref_config.get("allow_mutations").ok(),
            llm: pref_config.get("llm").unwrap_or_default(),
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            let path = shellexpand::tilde(target);
            settings.data_dir = PathBuf::from(path.as_ref());
            settings.output_dir = settings.data_dir.join("output");
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref output_dir) = self.output_dir {
            settings.output_dir = PathBuf::from(shellexpand::tilde(output_dir).as_ref());
        }
        if let Some(attempts) = self.max_sql_attempts {
            settings.max_sql_attempts = attempts.max(1);
        }
        if let Some(allow) = self.allow_mutations {
            settings.allow_mutations = allow;
        }
        settings.llm = self.llm.clone();
    }
}

/// Load settings from `.env`, configuration files and the environment.
pub async fn load_settings() -> Settings {
    dotenvy::dotenv().ok();
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings.apply_env();
    settings
}
