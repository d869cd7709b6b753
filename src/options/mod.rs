//! Centralized surface-generation options with TOML preset support.
//!
//! Molecular surface, volume extraction and worker pool settings are
//! consolidated here. Options serialize to/from TOML so presets can be kept
//! next to the data they are applied to.

mod surface;
mod volume;
mod worker;

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
pub use surface::SurfaceOptions;
pub use volume::{IsolevelType, VolumeOptions};
pub use worker::{WorkerOptions, MAX_WORKERS};

use crate::error::IsomeshError;

/// Top-level options container. All sub-structs use `#[serde(default)]` so
/// partial TOML files (e.g. only overriding `[surface]`) work correctly.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema,
)]
#[serde(default)]
pub struct Options {
    /// Molecular surface parameters.
    pub surface: SurfaceOptions,
    /// Volume isosurface parameters.
    pub volume: VolumeOptions,
    /// Worker pool sizing.
    pub worker: WorkerOptions,
}

impl Options {
    /// Generate JSON Schema describing the UI-exposed options.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(Options)
    }

    /// Parse options from a TOML string. Missing fields use defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, IsomeshError> {
        toml::from_str(content)
            .map_err(|e| IsomeshError::OptionsParse(e.to_string()))
    }

    /// Load options from a TOML file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self, IsomeshError> {
        let content =
            std::fs::read_to_string(path).map_err(IsomeshError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Save options to a TOML file (pretty-printed).
    pub fn save(&self, path: &Path) -> Result<(), IsomeshError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| IsomeshError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(IsomeshError::Io)?;
        }
        std::fs::write(path, content).map_err(IsomeshError::Io)
    }

    /// List available preset names (TOML file stems) in a directory.
    #[must_use]
    pub fn list_presets(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) =
                        path.file_stem().and_then(|s| s.to_str())
                    {
                        names.push(stem.to_owned());
                    }
                }
            }
        }
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::SurfaceType;

    #[test]
    fn default_round_trips_through_toml() {
        let opts = Options::default();
        let toml_str = toml::to_string_pretty(&opts).unwrap();
        let parsed: Options = toml::from_str(&toml_str).unwrap();
        assert_eq!(opts, parsed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
[surface]
surface_type = "av"
probe_radius = 1.2
"#;
        let opts = Options::from_toml_str(toml_str).unwrap();
        assert_eq!(opts.surface.surface_type, SurfaceType::Av);
        assert_eq!(opts.surface.probe_radius, 1.2);
        // Everything else should be default
        assert_eq!(opts.surface.scale_factor, 2.0);
        assert_eq!(opts.surface.smooth, 2);
        assert_eq!(opts.volume, VolumeOptions::default());
        assert_eq!(opts.worker.max_count, 2);
    }

    #[test]
    fn malformed_toml_is_an_options_error() {
        let err = Options::from_toml_str("[surface]\nsmooth = \"lots\"")
            .unwrap_err();
        assert!(matches!(err, IsomeshError::OptionsParse(_)));
    }

    #[test]
    fn worker_count_is_clamped() {
        let opts = WorkerOptions { max_count: 0 };
        assert_eq!(opts.clamped_max_count(), 1);
        let opts = WorkerOptions { max_count: 64 };
        assert_eq!(opts.clamped_max_count(), MAX_WORKERS);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = std::env::temp_dir()
            .join(format!("isomesh-options-{}", std::process::id()));
        let path = dir.join("preset.toml");
        let mut opts = Options::default();
        opts.surface.surface_type = SurfaceType::Ses;
        opts.volume.wrap = true;
        opts.save(&path).unwrap();
        let loaded = Options::load(&path).unwrap();
        assert_eq!(opts, loaded);
        assert_eq!(Options::list_presets(&dir), vec!["preset".to_owned()]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn schema_has_expected_properties() {
        let schema_value =
            serde_json::to_value(Options::json_schema()).unwrap();
        let props = schema_value["properties"].as_object().unwrap();

        assert!(props.contains_key("surface"));
        assert!(props.contains_key("volume"));
        assert!(props.contains_key("worker"));

        // Surface should have exposed fields but not skipped ones
        let surface = &props["surface"]["properties"];
        assert!(surface.get("probe_radius").is_some());
        assert!(surface.get("surface_type").is_some());
        assert!(surface.get("radius").is_none());
        assert!(surface.get("probe_positions").is_none());
    }
}
