use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use murmur_storage::DEFAULT_COLLECTION;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "murmur";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "messages.db";
pub const ENV_PREFIX: &str = "MURMUR_";
pub const DEFAULT_MUTATION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSettings {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_mutation_timeout_ms")]
    pub mutation_timeout_ms: u64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            database_path: default_database_path(),
            mutation_timeout_ms: DEFAULT_MUTATION_TIMEOUT_MS,
            log_filter: default_log_filter(),
        }
    }
}

impl MirrorSettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".murmur"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Layers defaults, the JSON file at `path` (or the default location) and
    /// `MURMUR_*` environment variables. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Json::file(&path))
            .merge(Env::prefixed(ENV_PREFIX));

        let settings = figment.extract::<Self>().context(ExtractSnafu {
            stage: "extract-settings",
            path: path.clone(),
        })?;
        Ok(settings.normalized())
    }

    pub fn normalized(mut self) -> Self {
        self.collection = non_blank_or(self.collection, default_collection);
        self.database_path = non_blank_or(self.database_path, default_database_path);
        self.log_filter = non_blank_or(self.log_filter, default_log_filter);
        if self.mutation_timeout_ms == 0 {
            self.mutation_timeout_ms = DEFAULT_MUTATION_TIMEOUT_MS;
        }
        self
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to load settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: PathBuf,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
}

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".murmur"))
        .join(DATABASE_FILE_NAME)
        .to_string_lossy()
        .into_owned()
}

fn default_mutation_timeout_ms() -> u64 {
    DEFAULT_MUTATION_TIMEOUT_MS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
