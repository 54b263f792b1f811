use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_codes::{CodedError, ErrorCode};
use crate::gradient::{validate_color_stops, ColorStop};
use crate::params::{ParamCategory, ParamKey, ParamValue, ParameterSet};
use crate::validation::RuleSet;

/// A named bundle of parameter values. Applying it only touches the keys it
/// carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip)]
    pub builtin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    pub values: BTreeMap<ParamKey, ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_stops: Option<Vec<ColorStop>>,
}

impl Preset {
    /// Snapshot of every parameter (and the active color stops).
    pub fn from_params(
        name: impl Into<String>,
        description: impl Into<String>,
        params: &ParameterSet,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            builtin: false,
            created_at: Some(now),
            modified_at: Some(now),
            values: params
                .iter()
                .map(|(key, value)| (key, value.clone()))
                .collect(),
            color_stops: params.color_stops().map(<[ColorStop]>::to_vec),
        }
    }

    fn builtin(name: &str, description: &str, values: &[(ParamKey, ParamValue)]) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            builtin: true,
            created_at: None,
            modified_at: None,
            values: values.iter().cloned().collect(),
            color_stops: None,
        }
    }

    fn with_stops(mut self, stops: &[(f32, &str)]) -> Self {
        self.color_stops = Some(
            stops
                .iter()
                .map(|(position, color)| ColorStop::new(*position, *color))
                .collect(),
        );
        self
    }

    /// Key/value pairs in schema order, ready for a batch update.
    pub fn updates(&self) -> Vec<(ParamKey, ParamValue)> {
        self.values
            .iter()
            .map(|(key, value)| (*key, value.clone()))
            .collect()
    }

    /// Whether applying this preset should drop active color stops: a preset
    /// that sets palette colors without its own stops means the palette.
    pub fn resets_color_stops(&self) -> bool {
        self.color_stops.is_none()
            && [ParamKey::Color1, ParamKey::Color2, ParamKey::Color3, ParamKey::Color4]
                .iter()
                .any(|key| self.values.contains_key(key))
    }

    pub fn validate(&self, rules: &RuleSet) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!(CodedError::new(
                ErrorCode::PresetSaveError,
                "preset name must not be empty"
            )));
        }
        let invalid: Vec<String> = self
            .values
            .iter()
            .filter_map(|(key, value)| {
                let result = rules.validate(*key, value);
                (!result.valid).then(|| {
                    format!(
                        "{key}: {}",
                        result.message.unwrap_or_else(|| "invalid".to_owned())
                    )
                })
            })
            .collect();
        if !invalid.is_empty() {
            return Err(anyhow!(CodedError::new(
                ErrorCode::InvalidParameters,
                format!("preset '{}' has invalid values: {}", self.name, invalid.join("; "))
            )
            .with_details(json!({ "preset": self.name, "invalid": invalid }))));
        }
        if let Some(stops) = &self.color_stops {
            validate_color_stops(stops)
                .with_context(|| format!("preset '{}' has invalid color stops", self.name))?;
        }
        Ok(())
    }
}

pub fn builtin_presets() -> Vec<Preset> {
    use ParamKey::*;

    let text = ParamValue::text;
    let num = ParamValue::Number;

    let defaults: Vec<(ParamKey, ParamValue)> = ParamKey::ALL
        .iter()
        .filter(|key| key.category() != ParamCategory::Export)
        .map(|key| (*key, key.default_value()))
        .collect();

    vec![
        Preset::builtin("default", "Soft warm gradient on a plane", &defaults),
        Preset::builtin(
            "aurora",
            "Slow green and violet curtains",
            &[
                (Color1, text("#0b3d2e")),
                (Color2, text("#1fd18b")),
                (Color3, text("#7b5cff")),
                (Color4, text("#0a0f2c")),
                (GradientMode, text("noise")),
                (NormalNoiseScaleX, num(0.8)),
                (NormalNoiseScaleY, num(2.4)),
                (NormalNoiseSpeed, num(0.08)),
                (NormalNoiseStrength, num(0.9)),
                (ColorNoiseScale, num(1.2)),
                (RimLightIntensity, num(0.35)),
            ],
        ),
        Preset::builtin(
            "sunset",
            "Warm linear sky ramp",
            &[
                (Color1, text("#2d1b4e")),
                (Color2, text("#c2407a")),
                (Color3, text("#ff8c42")),
                (Color4, text("#ffd166")),
                (GradientMode, text("linear")),
                (GradientShift, num(0.1)),
                (NormalNoiseStrength, num(0.3)),
                (AmbientIntensity, num(0.7)),
            ],
        ),
        Preset::builtin(
            "ocean",
            "Rolling blue sphere",
            &[
                (GeometryType, text("sphere")),
                (SphereRadius, num(2.2)),
                (Color1, text("#03045e")),
                (Color2, text("#0077b6")),
                (Color3, text("#00b4d8")),
                (Color4, text("#caf0f8")),
                (GradientMode, text("noise")),
                (NormalNoiseStrength, num(0.35)),
                (NormalNoiseSpeed, num(0.25)),
                (DiffuseIntensity, num(0.8)),
            ],
        ),
        Preset::builtin(
            "lava",
            "Molten multi-stop gradient",
            &[
                (GradientMode, text("noise")),
                (ColorNoiseScale, num(3.5)),
                (ColorNoiseSpeed, num(0.3)),
                (NormalNoiseStrength, num(1.1)),
                (BackgroundColor, text("#120202")),
            ],
        )
        .with_stops(&[
            (0.0, "#1a0000"),
            (0.35, "#8b0000"),
            (0.6, "#ff4500"),
            (0.85, "#ffae00"),
            (1.0, "#fff3b0"),
        ]),
        Preset::builtin(
            "monochrome",
            "Grayscale radial study",
            &[
                (Color1, text("#111111")),
                (Color2, text("#555555")),
                (Color3, text("#aaaaaa")),
                (Color4, text("#f5f5f5")),
                (GradientMode, text("radial")),
                (RimLightIntensity, num(0.0)),
                (BackgroundColor, text("#ffffff")),
            ],
        ),
    ]
}

/// Built-in presets followed by user presets. User presets are optionally
/// backed by a directory of `<slug>.json` files.
#[derive(Debug, Clone)]
pub struct PresetStore {
    presets: Vec<Preset>,
    directory: Option<PathBuf>,
}

impl Default for PresetStore {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PresetStore {
    pub fn with_builtins() -> Self {
        Self {
            presets: builtin_presets(),
            directory: None,
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn list(&self) -> &[Preset] {
        &self.presets
    }

    pub fn names(&self) -> Vec<String> {
        self.presets.iter().map(|preset| preset.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|preset| preset.name == name)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.get(name).is_some_and(|preset| preset.builtin)
    }

    /// Inserts or replaces a user preset, keeping the original creation time
    /// on replacement. Written to disk when a directory is attached.
    pub fn save(&mut self, mut preset: Preset) -> Result<()> {
        if self.is_builtin(&preset.name) {
            return Err(anyhow!(CodedError::new(
                ErrorCode::PresetSaveError,
                format!("cannot overwrite built-in preset '{}'", preset.name)
            )));
        }
        preset.builtin = false;
        let now = Utc::now();
        preset.modified_at = Some(now);

        match self.presets.iter_mut().find(|p| p.name == preset.name) {
            Some(existing) => {
                preset.created_at = existing.created_at.or(Some(now));
                *existing = preset.clone();
            }
            None => {
                preset.created_at.get_or_insert(now);
                self.presets.push(preset.clone());
                self.sort_user_presets();
            }
        }

        if self.directory.is_some() {
            let path = self.persist(&preset)?;
            tracing::info!(preset = %preset.name, path = %path.display(), "preset saved");
        }
        Ok(())
    }

    /// Removes a user preset. Returns `Ok(false)` when no preset has that
    /// name; built-ins are refused with `CANNOT_DELETE_BUILTIN`.
    pub fn delete(&mut self, name: &str) -> Result<bool> {
        if self.is_builtin(name) {
            return Err(anyhow!(CodedError::new(
                ErrorCode::CannotDeleteBuiltin,
                format!("cannot delete built-in preset '{name}'")
            )
            .with_details(json!({ "preset": name }))));
        }
        let Some(index) = self.presets.iter().position(|p| p.name == name) else {
            return Ok(false);
        };
        self.presets.remove(index);

        if let Some(dir) = &self.directory {
            let path = dir.join(preset_file_name(name));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove preset file {}", path.display()))?;
            }
        }
        Ok(true)
    }

    /// Attaches `dir` and loads every `*.json` preset in it. Files that fail
    /// to parse or validate are skipped with a warning; names that collide
    /// with built-ins are ignored.
    pub fn load_directory(&mut self, dir: &Path, rules: &RuleSet) -> Result<usize> {
        self.directory = Some(dir.to_path_buf());
        if !dir.exists() {
            return Ok(0);
        }

        let mut paths = fs::read_dir(dir)
            .with_context(|| format!("failed to read preset directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match read_preset(&path, rules) {
                Ok(preset) if self.is_builtin(&preset.name) => {
                    tracing::warn!(
                        path = %path.display(),
                        preset = %preset.name,
                        "ignoring user preset that shadows a built-in"
                    );
                }
                Ok(preset) => {
                    self.presets.retain(|p| p.name != preset.name);
                    self.presets.push(preset);
                    loaded += 1;
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), "skipping preset: {error:#}");
                }
            }
        }
        self.sort_user_presets();
        Ok(loaded)
    }

    pub fn persist(&self, preset: &Preset) -> Result<PathBuf> {
        let dir = self
            .directory
            .as_ref()
            .ok_or_else(|| anyhow!("no preset directory configured"))?;
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create preset directory {}", dir.display()))?;
        let path = dir.join(preset_file_name(&preset.name));
        let json = serde_json::to_string_pretty(preset).context("failed to serialize preset")?;
        fs::write(&path, format!("{json}\n"))
            .with_context(|| format!("failed to write preset {}", path.display()))?;
        Ok(path)
    }

    fn sort_user_presets(&mut self) {
        // sort_by_key is stable, so built-ins keep their definition order
        self.presets.sort_by_key(|preset| {
            if preset.builtin {
                (0, String::new())
            } else {
                (1, preset.name.clone())
            }
        });
    }
}

fn read_preset(path: &Path, rules: &RuleSet) -> Result<Preset> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read preset {}", path.display()))?;
    let preset: Preset = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse preset {}", path.display()))?;
    preset.validate(rules)?;
    Ok(preset)
}

pub fn preset_file_name(name: &str) -> String {
    format!("{}.json", slugify(name))
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "preset".to_owned()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::find_coded_error;

    #[test]
    fn builtins_validate_against_standard_rules() {
        let rules = RuleSet::standard();
        for preset in builtin_presets() {
            preset
                .validate(&rules)
                .unwrap_or_else(|e| panic!("{}: {e:#}", preset.name));
            assert!(preset.builtin);
        }
    }

    #[test]
    fn builtins_cannot_be_deleted_or_overwritten() {
        let mut store = PresetStore::with_builtins();
        let error = store.delete("aurora").unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|e| e.code),
            Some(ErrorCode::CannotDeleteBuiltin)
        );
        assert!(store.get("aurora").is_some());

        let overwrite = Preset::from_params("ocean", "", &ParameterSet::defaults());
        assert!(store.save(overwrite).is_err());
        assert!(store.is_builtin("ocean"));
    }

    #[test]
    fn user_presets_sort_after_builtins() {
        let mut store = PresetStore::with_builtins();
        let params = ParameterSet::defaults();
        store
            .save(Preset::from_params("zeta", "", &params))
            .expect("save");
        store
            .save(Preset::from_params("alpha", "", &params))
            .expect("save");
        let names = store.names();
        assert_eq!(names.first().map(String::as_str), Some("default"));
        assert_eq!(&names[names.len() - 2..], ["alpha", "zeta"]);
        assert!(store.delete("alpha").expect("delete"));
        assert!(!store.delete("alpha").expect("delete"));
    }

    #[test]
    fn palette_presets_reset_stops() {
        let presets = builtin_presets();
        let find = |name: &str| presets.iter().find(|p| p.name == name).expect("preset");
        assert!(find("sunset").resets_color_stops());
        assert!(!find("lava").resets_color_stops());
    }

    #[test]
    fn slugs_are_filesystem_friendly() {
        assert_eq!(slugify("My Cool  Preset!"), "my-cool-preset");
        assert_eq!(slugify("  "), "preset");
        assert_eq!(preset_file_name("Night/Sky"), "night-sky.json");
    }
}
