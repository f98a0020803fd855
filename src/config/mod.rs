//! Config Module - Laufzeit-Konfiguration
//!
//! Quelle ist eine optionale JSON-Datei (`LOOPBACK_CALL_CONFIG`),
//! darüber liegen Umgebungsvariablen:
//! - `ICE_SERVERS` (kommagetrennt)
//! - `LOOPBACK_CALL_ENGINE` (`webrtc` oder `memory`)

use crate::capture::CaptureConstraints;
use crate::engine::{RtcConfig, DEFAULT_ICE_SERVER};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "LOOPBACK_CALL_CONFIG";
pub const ICE_SERVERS_ENV: &str = "ICE_SERVERS";
pub const ENGINE_ENV: &str = "LOOPBACK_CALL_ENGINE";

const ICE_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    WebRtc,
    Memory,
}

impl std::str::FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webrtc" => Ok(EngineKind::WebRtc),
            "memory" => Ok(EngineKind::Memory),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown engine '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ice_servers: Vec<String>,
    pub capture: CaptureConstraints,
    pub log_filter: String,
    /// Wie lange auf Remote Tracks gewartet wird
    pub remote_media_timeout_ms: u64,
    pub engine: EngineKind,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            capture: CaptureConstraints::default(),
            log_filter: "loopback_call=debug,webrtc=warn".to_string(),
            remote_media_timeout_ms: 5000,
            engine: EngineKind::WebRtc,
        }
    }
}

impl AppConfig {
    /// Lädt Datei (falls gesetzt) und Env-Overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        config.apply_overrides(
            std::env::var(ICE_SERVERS_ENV).ok().as_deref(),
            std::env::var(ENGINE_ENV).ok().as_deref(),
        )?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!("Reading config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Überschreibt Werte aus Env-Variablen
    pub fn apply_overrides(
        &mut self,
        ice_servers: Option<&str>,
        engine: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(list) = ice_servers {
            self.ice_servers = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(engine) = engine {
            self.engine = engine.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.is_empty() {
            return Err(ConfigError::InvalidValue(
                "capture must request audio or video".to_string(),
            ));
        }

        for url in &self.ice_servers {
            if !ICE_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
                return Err(ConfigError::InvalidValue(format!(
                    "unsupported ICE server url '{}'",
                    url
                )));
            }
        }
        Ok(())
    }

    pub fn rtc_config(&self) -> RtcConfig {
        RtcConfig {
            ice_servers: self.ice_servers.clone(),
        }
    }
}
