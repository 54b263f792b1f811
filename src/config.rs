use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::adaptive::AdaptiveSettings;
use crate::debounce::DebounceWindows;
use crate::export::ImageFormat;

/// Editor configuration, read from YAML. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EditorConfig {
    pub render: RenderConfig,
    pub debounce: DebounceWindows,
    pub adaptive: AdaptiveSettings,
    pub presets: PresetConfig,
    pub shaders: ShaderConfig,
    pub export: ExportDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 960,
            height: 540,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresetConfig {
    /// Where user presets are loaded from and saved to.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShaderConfig {
    /// Directory whose `noise.wgsl`, `vertex.wgsl` or `fragment.wgsl`
    /// replace the built-in sources.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportDefaults {
    pub format: ImageFormat,
    pub quality: f32,
    pub transparent: bool,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            quality: 0.92,
            transparent: false,
        }
    }
}

impl EditorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.render.width == 0 || self.render.height == 0 {
            bail!(
                "render size must be positive, got {}x{}",
                self.render.width,
                self.render.height
            );
        }
        if self.render.width > 8192 || self.render.height > 8192 {
            bail!(
                "render size must be at most 8192x8192, got {}x{}",
                self.render.width,
                self.render.height
            );
        }
        self.debounce.validate()?;
        self.adaptive.validate()?;
        if !(0.0..=1.0).contains(&self.export.quality) {
            bail!(
                "export.quality must be within [0, 1], got {}",
                self.export.quality
            );
        }
        Ok(())
    }

    /// Resolves relative directories against the config file's folder.
    fn resolve_paths(&mut self, base: &Path) {
        for dir in [&mut self.presets.directory, &mut self.shaders.directory]
            .into_iter()
            .flatten()
        {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<EditorConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut config: EditorConfig = serde_yaml::from_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(
            "failed to parse yaml in {} at {}: {}",
            path.display(),
            location,
            error
        )
    })?;

    let base = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    config.resolve_paths(&base);
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("editor.yaml");
        fs::write(&path, "{}\n").expect("write");
        let config = load_config(&path).expect("config");
        assert_eq!(config.render, RenderConfig::default());
        assert_eq!(config.debounce.geometry_ms, 150);
        assert!(config.adaptive.enabled);
    }

    #[test]
    fn relative_directories_follow_the_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("editor.yaml");
        fs::write(
            &path,
            "presets:\n  directory: presets\nshaders:\n  directory: /opt/shaders\n",
        )
        .expect("write");
        let config = load_config(&path).expect("config");
        assert_eq!(config.presets.directory, Some(dir.path().join("presets")));
        assert_eq!(config.shaders.directory, Some(PathBuf::from("/opt/shaders")));
    }

    #[test]
    fn unknown_keys_report_their_location() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("editor.yaml");
        fs::write(&path, "render:\n  width: 64\n  depth: 3\n").expect("write");
        let message = format!("{:#}", load_config(&path).unwrap_err());
        assert!(message.contains("line 3"), "{message}");
    }

    #[test]
    fn out_of_range_windows_are_rejected() {
        let mut config = EditorConfig::default();
        config.debounce.geometry_ms = 5000;
        assert!(config.validate().is_err());
    }
}
