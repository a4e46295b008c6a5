use std::fs;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::transform::Scale;

/// Which channels a per-channel rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelFilter {
    All,
    Only(u8),
}

impl ChannelFilter {
    pub fn matches(self, channel: u8) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::Only(only) => only == channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArpeggioSettings {
    pub enabled: bool,
    pub channel: ChannelFilter,
    pub scale: Scale,
    /// Notes per arpeggio, capped by the scale length.
    pub count: usize,
}

impl Default for ArpeggioSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: ChannelFilter::Only(0),
            scale: Scale::default(),
            count: 2,
        }
    }
}

/// Options of the standard transform stages. Read fresh for every event, so a
/// new snapshot takes effect mid-performance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    pub arpeggio: ArpeggioSettings,
    pub skip_preset_changes: bool,
    pub randomize_tempo: bool,
    pub log_events: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How many generations of emitted events the pipeline follows.
    pub recursion_limit: usize,
    /// Events stages may emit for a single source event.
    pub max_generated_events: usize,
    pub input_poll_interval_ms: u64,
    pub monitor_capacity: usize,
    /// Upper bound on the player's sleep between checks for commands.
    pub player_max_wait_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            recursion_limit: 8,
            max_generated_events: 256,
            input_poll_interval_ms: 1,
            monitor_capacity: 1024,
            player_max_wait_ms: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transform: TransformSettings,
    pub engine: EngineSettings,
}

impl Config {
    pub fn from_ron(text: &str) -> Result<Self> {
        Ok(ron::from_str(text)?)
    }

    pub fn to_ron(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}

/// Transform settings shared across threads. One writer stores whole new
/// snapshots; stages load the current one per event.
pub type SharedSettings = Arc<ArcSwap<TransformSettings>>;

pub fn shared(settings: TransformSettings) -> SharedSettings {
    Arc::new(ArcSwap::from_pointee(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ScaleName;

    #[test]
    fn partial_files_fill_in_defaults() {
        let config = Config::from_ron(
            "(transform: (skip_preset_changes: true, arpeggio: (channel: All, scale: Named(Blues))))",
        )
        .unwrap();
        assert!(config.transform.skip_preset_changes);
        assert_eq!(config.transform.arpeggio.channel, ChannelFilter::All);
        assert_eq!(config.transform.arpeggio.scale, Scale::Named(ScaleName::Blues));
        assert_eq!(config.transform.arpeggio.count, 2);
        assert_eq!(config.engine, EngineSettings::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let mut config = Config::default();
        config.transform.arpeggio.scale = Scale::Custom(vec![0, 3, 7, 10]);
        config.transform.randomize_tempo = true;
        config.engine.recursion_limit = 3;

        let path = std::env::temp_dir().join(format!("tempora-config-{}.ron", std::process::id()));
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        assert!(matches!(
            Config::from_ron("(transform: (skip_preset_changes: \"yes\"))"),
            Err(crate::Error::ConfigParse(_))
        ));
    }

    #[test]
    fn shared_settings_swap_atomically() {
        let settings = shared(TransformSettings::default());
        let reader = settings.clone();
        settings.rcu(|current| TransformSettings {
            log_events: true,
            ..(**current).clone()
        });
        assert!(reader.load().log_events);
    }
}
