use crate::advisory::AdvisoryConfig;
use crate::layout::LayoutConfig;
use crate::paste::PasteConfig;
use crate::store::StoreConfig;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Every tunable in one JSON document. Missing sections and fields fall back
/// to their defaults.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub paste: PasteConfig,
    pub layout: LayoutConfig,
    pub advisory: AdvisoryConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.layout.page_height.is_finite() && self.layout.page_height > 0.0) {
            return Err(ConfigError::Invalid("layout.page_height must be positive"));
        }
        if self.paste.tab_width == 0 {
            return Err(ConfigError::Invalid("paste.tab_width must be at least 1"));
        }
        Ok(())
    }
}
