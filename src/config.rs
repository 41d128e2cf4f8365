//! Runtime configuration
//!
//! Values come from the environment (a `.env` file is loaded by the binary via
//! `dotenv`), and CLI flags override them.

use crate::error::{GreenIndexError, Result};
use crate::query_extractor::ValidationPolicy;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_QUERY_MODEL: &str = "llama3-70b-8192";
pub const DEFAULT_ANALYSIS_MODEL: &str = "llama-3.1-70b-versatile";
pub const DEFAULT_IMAGE_API_URL: &str = "https://greenindexai-nv6x.onrender.com";
pub const DEFAULT_DATA_PATH: &str = "ndvi_data.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_key: Option<String>,
    pub llm_base_url: String,
    pub query_model: String,
    pub analysis_model: String,
    /// Send `response_format: json_object` with extraction requests.
    pub json_mode: bool,
    pub image_api_url: String,
    pub images_enabled: bool,
    pub data_path: PathBuf,
    /// Applies to every outbound HTTP call.
    pub timeout: Duration,
    pub validation_policy: ValidationPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            query_model: DEFAULT_QUERY_MODEL.to_string(),
            analysis_model: DEFAULT_ANALYSIS_MODEL.to_string(),
            json_mode: true,
            image_api_url: DEFAULT_IMAGE_API_URL.to_string(),
            images_enabled: true,
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            validation_policy: ValidationPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        config.api_key = get("GROQ_API_KEY").or_else(|| get("OPENAI_API_KEY"));
        if let Some(url) = get("GREENINDEX_LLM_BASE_URL") {
            config.llm_base_url = url;
        }
        if let Some(model) = get("GREENINDEX_QUERY_MODEL") {
            config.query_model = model;
        }
        if let Some(model) = get("GREENINDEX_ANALYSIS_MODEL") {
            config.analysis_model = model;
        }
        if let Some(flag) = get("GREENINDEX_JSON_MODE") {
            config.json_mode = parse_bool("GREENINDEX_JSON_MODE", &flag)?;
        }
        if let Some(url) = get("GREENINDEX_IMAGE_API_URL") {
            config.image_api_url = url;
        }
        if let Some(flag) = get("GREENINDEX_IMAGES") {
            config.images_enabled = parse_bool("GREENINDEX_IMAGES", &flag)?;
        }
        if let Some(path) = get("GREENINDEX_DATA") {
            config.data_path = PathBuf::from(path);
        }
        if let Some(secs) = get("GREENINDEX_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                GreenIndexError::Config(format!("GREENINDEX_TIMEOUT_SECS must be a number of seconds, got '{}'", secs))
            })?;
            if secs == 0 {
                return Err(GreenIndexError::Config("GREENINDEX_TIMEOUT_SECS must be positive".to_string()));
            }
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = get("GREENINDEX_VALIDATION_POLICY") {
            config.validation_policy = policy.parse()?;
        }

        Ok(config)
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            GreenIndexError::Config("no API key: set GROQ_API_KEY (or OPENAI_API_KEY) or pass --api-key".to_string())
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(GreenIndexError::Config(format!("{} must be true or false, got '{}'", key, other))),
    }
}
