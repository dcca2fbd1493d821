use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::overrides::OverrideSet;

const DEFAULT_GPU_JSON: &str = "default_gpu";
const PRESETS_JSON: &str = "presets";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open configuration file \"{}\"", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("Failed to parse configuration file \"{}\"", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Configuration file \"{}\" must hold a Json object", .path.display())]
    NotAnObject { path: PathBuf },
    #[error("Unknown preset \"{0}\"")]
    UnknownPreset(String),
}

// A named set of overrides stored in the configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PresetConfig {
    pub name: String,

    #[serde(flatten)]
    pub overrides: OverrideSet,
}

// Manage the stored Json configuration
#[derive(Debug, Default)]
pub struct ConfigManager {
    // GPU used when the request doesn't name one
    default_gpu: u32,

    presets: HashMap<String, PresetConfig>,
}

impl ConfigManager {
    // Load the configuration file, a missing file
    // results in the default configuration
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            config.parse_config_file(path)?;
        }

        trace!("Current presets: {:?}", config.presets);

        Ok(config)
    }

    pub fn default_gpu(&self) -> u32 {
        self.default_gpu
    }

    // Return the overrides of the named preset
    pub fn preset(&self, name: &str) -> Result<OverrideSet, ConfigError> {
        self.presets
            .get(name)
            .map(|preset| preset.overrides)
            .ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))
    }

    fn parse_config_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        debug!("Parsing config file at: {path:?}");

        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("Configuration file {path:?} not found, using defaults");
                return Ok(());
            }
            Err(source) => {
                return Err(ConfigError::Open {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let buf = BufReader::new(file);

        // Parse the Json data
        let config_json: Value =
            serde_json::from_reader(buf).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if !config_json.is_object() {
            return Err(ConfigError::NotAnObject {
                path: path.to_path_buf(),
            });
        }

        self.parse_config_json(config_json);

        Ok(())
    }

    fn parse_config_json(&mut self, mut config_json: Value) {
        match config_json.get(DEFAULT_GPU_JSON) {
            None | Some(Value::Null) => {}
            Some(value) => match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
                Some(gpu) => self.default_gpu = gpu,
                None => warn!("Invalid default GPU: {value}, ignoring it"),
            },
        }

        // Parse all of the preset entries
        if let Some(Value::Array(presets)) =
            config_json.get_mut(PRESETS_JSON).map(Value::take)
        {
            for preset in presets {
                if let Err(err) = self.parse_preset(preset) {
                    warn!("Failed to parse preset: {err}");
                }
            }
        }
    }

    // Parse one preset and add it to the presets hash map
    fn parse_preset(&mut self, preset_json: Value) -> serde_json::Result<()> {
        let preset: PresetConfig = serde_json::from_value(preset_json)?;

        // If the preset is already in the config ignore it
        if self.presets.contains_key(preset.name.as_str()) {
            warn!(
                "Redefinition of preset: \"{}\", ignoring it",
                preset.name.as_str()
            );

            return Ok(());
        }

        self.presets.insert(preset.name.clone(), preset);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;

    fn config_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn no_path_gives_defaults() {
        let config = ConfigManager::load(None).unwrap();

        assert_eq!(config.default_gpu(), 0);
        assert!(matches!(
            config.preset("quiet"),
            Err(ConfigError::UnknownPreset(name)) if name == "quiet"
        ));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = ConfigManager::load(Some(&path)).unwrap();

        assert_eq!(config.default_gpu(), 0);
    }

    #[test]
    fn parses_default_gpu_and_presets() {
        let file = config_file(
            r#"{
                "default_gpu": 1,
                "presets": [
                    { "name": "quiet", "power_limit": -10, "zero_rpm": true },
                    { "name": "fast", "core_max_freq": 2800 }
                ]
            }"#,
        );

        let config = ConfigManager::load(Some(file.path())).unwrap();

        assert_eq!(config.default_gpu(), 1);
        assert_eq!(
            config.preset("quiet").unwrap(),
            OverrideSet {
                power_limit: Some(-10),
                zero_rpm: Some(true),
                ..Default::default()
            }
        );
        assert_eq!(config.preset("fast").unwrap().core_max_freq, Some(2800));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let file = config_file("{ \"presets\": [");

        assert!(matches!(
            ConfigManager::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn top_level_array_is_an_error() {
        let file = config_file("[1, 2]");

        assert!(matches!(
            ConfigManager::load(Some(file.path())),
            Err(ConfigError::NotAnObject { .. })
        ));
    }

    #[test]
    fn non_object_values_are_ignored() {
        let mut config = ConfigManager::default();

        config.parse_config_json(json!(42));
        config.parse_config_json(json!(["presets"]));

        assert_eq!(config.default_gpu(), 0);
        assert!(config.presets.is_empty());
    }

    #[test]
    fn malformed_presets_are_skipped() {
        let mut config = ConfigManager::default();

        config.parse_config_json(json!({
            "default_gpu": "first",
            "presets": [
                { "power_limit": 5 },
                { "name": "eco", "power_limit": "low" },
                { "name": "cool", "voltage_offset": -60 }
            ]
        }));

        assert_eq!(config.default_gpu(), 0);
        assert_eq!(config.presets.len(), 1);
        assert_eq!(config.preset("cool").unwrap().voltage_offset, Some(-60));
    }

    #[test]
    fn zero_frequency_presets_apply_nothing() {
        let mut config = ConfigManager::default();

        config.parse_config_json(json!({
            "presets": [
                { "name": "z", "core_max_freq": 0, "vram_max_freq": 0 }
            ]
        }));

        let overrides = config.preset("z").unwrap();
        assert!(overrides.is_empty());
        assert!(overrides.settings().is_empty());
    }

    #[test]
    fn redefined_preset_keeps_the_first() {
        let mut config = ConfigManager::default();

        config.parse_config_json(json!({
            "presets": [
                { "name": "oc", "vram_max_freq": 2400 },
                { "name": "oc", "vram_max_freq": 2600 }
            ]
        }));

        assert_eq!(config.preset("oc").unwrap().vram_max_freq, Some(2400));
    }
}
