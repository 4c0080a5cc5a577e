use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use plinth_llm::{GenerationConfig, DEFAULT_BASE_URL, DEFAULT_MAX_ATTEMPTS, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::error::{ConfigLoadSnafu, CoreResult};

pub const DEFAULT_DATABASE_PATH: &str = "plinth.db";
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

/// Generation settings as they appear in config sources; converted to the
/// client's [`GenerationConfig`] at service construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    pub max_output_tokens: Option<u64>,
    pub temperature: Option<f64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout_secs: 45,
            max_output_tokens: None,
            temperature: None,
        }
    }
}

impl GenerationSettings {
    pub fn to_client_config(&self) -> GenerationConfig {
        GenerationConfig {
            api_key: self.api_key.trim().to_string(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_attempts: self.max_attempts,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub database_path: String,
    pub upload_dir: PathBuf,
    pub generation: GenerationSettings,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            generation: GenerationSettings::default(),
        }
    }
}

impl PlatformConfig {
    /// Layering: defaults, then `plinth.toml`, then `PLINTH_*` environment
    /// variables (`__` separates nesting, e.g. `PLINTH_GENERATION__MODEL`).
    /// A bare `OPENAI_API_KEY` is honored as the credential fallback.
    pub fn load() -> CoreResult<Self> {
        Self::load_from(Figment::new())
    }

    pub(crate) fn load_from(overrides: Figment) -> CoreResult<Self> {
        let mut config: PlatformConfig = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("plinth.toml"))
            .merge(Env::prefixed("PLINTH_").split("__"))
            .merge(overrides)
            .extract()
            .context(ConfigLoadSnafu {
                stage: "config-load-extract",
            })?;

        if config.generation.api_key.trim().is_empty()
            && let Ok(key) = std::env::var("OPENAI_API_KEY")
        {
            config.generation.api_key = key;
        }

        Ok(config)
    }
}
