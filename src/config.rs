//! Runtime configuration.
//!
//! Every value has a default, so an empty or partial `config.toml` is valid.
//! The configuration is immutable once loaded; components receive it at
//! construction time.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dom::KeyEvent;
use crate::errors::{ConfigError, Result};

pub const CONFIG_DIR_NAME: &str = "quickreply";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trigger: TriggerConfig,
    pub insert: InsertConfig,
    pub frames: FrameConfig,
    pub greeting: GreetingConfig,
    pub legacy_editor: LegacyEditorConfig,
    pub paste_widget: PasteWidgetConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    None,
    Ctrl,
    Alt,
    Shift,
    Meta,
}

/// The keystroke that opens the picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub modifier: Modifier,
    pub key: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            modifier: Modifier::Ctrl,
            key: "/".to_string(),
        }
    }
}

impl TriggerConfig {
    pub fn matches(&self, event: &KeyEvent) -> bool {
        if event.key != self.key {
            return false;
        }
        match self.modifier {
            Modifier::None => true,
            Modifier::Ctrl => event.ctrl,
            Modifier::Alt => event.alt,
            Modifier::Shift => event.shift,
            Modifier::Meta => event.meta,
        }
    }

    /// The character the keystroke may leave behind in the field, if the key
    /// is a single printable character.
    pub fn trigger_char(&self) -> Option<char> {
        let mut chars = self.key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if !c.is_control() => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertConfig {
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for InsertConfig {
    fn default() -> Self {
        Self {
            retries: 6,
            retry_delay_ms: 80,
        }
    }
}

impl InsertConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Delays after which a new frame's document is probed again, measured
    /// from the moment the frame was discovered.
    pub probe_delays_ms: Vec<u64>,
    pub rescan_interval_ms: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            probe_delays_ms: vec![300, 1200, 3000],
            rescan_interval_ms: 2500,
        }
    }
}

impl FrameConfig {
    pub fn probe_delays(&self) -> impl Iterator<Item = Duration> + '_ {
        self.probe_delays_ms.iter().map(|ms| Duration::from_millis(*ms))
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreetingConfig {
    pub morning: String,
    pub afternoon: String,
    pub evening: String,
    pub morning_starts: u32,
    pub afternoon_starts: u32,
    pub evening_starts: u32,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            morning: "Bom dia".to_string(),
            afternoon: "Boa tarde".to_string(),
            evening: "Boa noite".to_string(),
            morning_starts: 5,
            afternoon_starts: 12,
            evening_starts: 18,
        }
    }
}

impl GreetingConfig {
    pub fn greeting_for_hour(&self, hour: u32) -> &str {
        if hour >= self.morning_starts && hour < self.afternoon_starts {
            &self.morning
        } else if hour >= self.afternoon_starts && hour < self.evening_starts {
            &self.afternoon
        } else {
            &self.evening
        }
    }
}

/// Structural hints used to find an embedded legacy editor frame when the
/// focused element is the page body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyEditorConfig {
    pub frame_ids: Vec<String>,
    /// Substrings of the frame address, checked in order.
    pub src_markers: Vec<String>,
}

impl Default for LegacyEditorConfig {
    fn default() -> Self {
        Self {
            frame_ids: vec!["mensagem___Frame".to_string()],
            src_markers: vec![
                "fckeditor.html".to_string(),
                "fckeditor".to_string(),
                "ckeditor".to_string(),
                "InstanceName=mensagem".to_string(),
            ],
        }
    }
}

/// Rich regions that only react to clipboard paste. A region matches when
/// an ancestor-or-self with `contenteditable="true"` carries every
/// attribute listed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasteWidgetConfig {
    pub enabled: bool,
    pub attributes: Vec<String>,
}

impl Default for PasteWidgetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attributes: vec!["data-tab".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        Ok(config_dir()?.join(crate::store::STORE_FILE_NAME))
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.trigger.key.is_empty() {
            return Err(ConfigError::Validation("trigger.key must not be empty".into()).into());
        }
        if self.insert.retries == 0 {
            return Err(ConfigError::Validation("insert.retries must be at least 1".into()).into());
        }
        let g = &self.greeting;
        if !(g.morning_starts < g.afternoon_starts && g.afternoon_starts < g.evening_starts)
            || g.evening_starts > 24
        {
            return Err(ConfigError::Validation(
                "greeting hours must satisfy morning < afternoon < evening <= 24".into(),
            )
            .into());
        }
        if self.frames.probe_delays_ms.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::Validation(
                "frames.probe_delays_ms must be increasing".into(),
            )
            .into());
        }
        Ok(())
    }

    pub fn parse(input: &str) -> Result<Self> {
        let config: Config = toml::from_str(input).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(ConfigError::from)?)
    }
}

// ----- Configuration Management -----

pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or(ConfigError::ConfigDirectoryNotFound)?;
    Ok(base.join(CONFIG_DIR_NAME))
}

pub fn get_config_path() -> Result<PathBuf> {
    let dir = config_dir()?;
    let file = dir.join(CONFIG_FILE_NAME);
    if file.exists() {
        return Ok(file);
    }

    fs::create_dir_all(&dir).map_err(|e| ConfigError::CreateConfigDir { source: e })?;
    create_default_config(&file)?;
    Ok(file)
}

pub fn create_default_config(path: &Path) -> Result<()> {
    let content = Config::default().to_toml()?;
    fs::write(path, content).map_err(|e| ConfigError::WriteDefaultConfig { source: e })?;
    info!("wrote default configuration to {}", path.display());
    Ok(())
}

pub fn load_config() -> Result<Config> {
    let path = get_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadConfig {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!("loading configuration from {}", path.display());
    Config::parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.trigger.trigger_char(), Some('/'));
        assert_eq!(config.insert.retries, 6);
        assert_eq!(config.insert.retry_delay(), Duration::from_millis(80));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [trigger]
            modifier = "alt"

            [insert]
            retries = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.trigger.modifier, Modifier::Alt);
        assert_eq!(config.trigger.key, "/");
        assert_eq!(config.insert.retries, 3);
        assert_eq!(config.insert.retry_delay_ms, 80);
        assert_eq!(config.frames.probe_delays_ms, vec![300, 1200, 3000]);
    }

    #[test]
    fn trigger_requires_modifier() {
        let trigger = TriggerConfig::default();
        assert!(trigger.matches(&KeyEvent::new("/").with_ctrl()));
        assert!(!trigger.matches(&KeyEvent::new("/")));
        assert!(!trigger.matches(&KeyEvent::new("a").with_ctrl()));

        let bare = TriggerConfig {
            modifier: Modifier::None,
            key: "/".into(),
        };
        assert!(bare.matches(&KeyEvent::new("/")));
    }

    #[test]
    fn named_keys_have_no_trigger_char() {
        let trigger = TriggerConfig {
            modifier: Modifier::Ctrl,
            key: "F2".into(),
        };
        assert_eq!(trigger.trigger_char(), None);
    }

    #[test]
    fn greeting_boundaries() {
        let g = GreetingConfig::default();
        assert_eq!(g.greeting_for_hour(4), "Boa noite");
        assert_eq!(g.greeting_for_hour(5), "Bom dia");
        assert_eq!(g.greeting_for_hour(11), "Bom dia");
        assert_eq!(g.greeting_for_hour(12), "Boa tarde");
        assert_eq!(g.greeting_for_hour(17), "Boa tarde");
        assert_eq!(g.greeting_for_hour(18), "Boa noite");
        assert_eq!(g.greeting_for_hour(23), "Boa noite");
    }

    #[test]
    fn validation_rejects_zero_retries() {
        assert!(Config::parse("[insert]\nretries = 0").is_err());
    }

    #[test]
    fn validation_rejects_unordered_probe_delays() {
        assert!(Config::parse("[frames]\nprobe_delays_ms = [1200, 300]").is_err());
    }

    #[test]
    fn default_config_survives_toml() {
        let text = Config::default().to_toml().unwrap();
        assert_eq!(Config::parse(&text).unwrap(), Config::default());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[greeting]\nmorning = \"Good morning\"\n").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.greeting.morning, "Good morning");
        assert_eq!(config.greeting.afternoon, "Boa tarde");
    }
}
