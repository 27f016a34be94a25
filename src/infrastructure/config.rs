use crate::infrastructure::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const SYNC_JSON: &str = "sync.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SoundSettings {
    pub enabled: bool,
    pub file: String,
    pub volume: f32,
}

impl SoundSettings {
    fn alarm(enabled: bool) -> Self {
        Self {
            enabled,
            file: "/sounds/alarm/alarm01.mp3".to_string(),
            volume: 0.5,
        }
    }
}

impl Default for SoundSettings {
    fn default() -> Self {
        Self::alarm(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub schema: u64,
    pub edit_debounce_ms: u64,
    pub composition_settle_ms: u64,
    pub tick_interval_ms: u64,
    pub go_to_roast_room_seconds: u32,
    pub timer_sound: SoundSettings,
    pub notification_sound: SoundSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema: SUPPORTED_SCHEMA,
            edit_debounce_ms: 500,
            composition_settle_ms: 300,
            tick_interval_ms: 1000,
            go_to_roast_room_seconds: 60,
            timer_sound: SoundSettings::alarm(false),
            notification_sound: SoundSettings::alarm(true),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.schema != SUPPORTED_SCHEMA {
            return Err(SyncError::InvalidConfig(format!(
                "unsupported schema {}",
                self.schema
            )));
        }
        if self.edit_debounce_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "editDebounceMs must be > 0".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "tickIntervalMs must be > 0".to_string(),
            ));
        }
        for (name, sound) in [
            ("timerSound", &self.timer_sound),
            ("notificationSound", &self.notification_sound),
        ] {
            if !(0.0..=1.0).contains(&sound.volume) {
                return Err(SyncError::InvalidConfig(format!(
                    "{name}.volume must be between 0 and 1"
                )));
            }
        }
        Ok(())
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), SyncError> {
    let path = config_dir.join(SYNC_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&SyncConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

pub fn load_config(config_dir: &Path) -> Result<SyncConfig, SyncError> {
    let path = config_dir.join(SYNC_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| SyncError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(SyncError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }

    let config: SyncConfig = serde_json::from_value(parsed)?;
    config.validate()?;
    Ok(config)
}
