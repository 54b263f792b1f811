use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_codes::{CodedError, ErrorCode};
use crate::gradient::{hex_color_pattern, normalize_color_stops, ColorStop};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamCategory {
    Geometry,
    Rotation,
    Camera,
    Noise,
    Color,
    Lighting,
    Visualization,
    Animation,
    Export,
}

impl ParamCategory {
    pub const ALL: [ParamCategory; 9] = [
        Self::Geometry,
        Self::Rotation,
        Self::Camera,
        Self::Noise,
        Self::Color,
        Self::Lighting,
        Self::Visualization,
        Self::Animation,
        Self::Export,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::Rotation => "rotation",
            Self::Camera => "camera",
            Self::Noise => "noise",
            Self::Color => "color",
            Self::Lighting => "lighting",
            Self::Visualization => "visualization",
            Self::Animation => "animation",
            Self::Export => "export",
        }
    }
}

/// Declared value type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Number,
    Integer,
    Color,
    Bool,
    Enum(&'static [&'static str]),
}

impl ParamKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Integer => "int",
            Self::Color => "color",
            Self::Bool => "bool",
            Self::Enum(_) => "enum",
        }
    }

    pub fn accepts(self, value: &ParamValue) -> bool {
        match (self, value) {
            (Self::Number, ParamValue::Number(number)) => number.is_finite(),
            (Self::Integer, ParamValue::Number(number)) => number.is_finite(),
            (Self::Color, ParamValue::Text(_)) => true,
            (Self::Enum(_), ParamValue::Text(_)) => true,
            (Self::Bool, ParamValue::Bool(_)) => true,
            _ => false,
        }
    }
}

pub const GEOMETRY_TYPES: &[&str] = &["plane", "sphere", "cube"];
pub const GRADIENT_MODES: &[&str] = &["linear", "radial", "noise"];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ParamKey {
    GeometryType,
    PlaneWidth,
    PlaneHeight,
    PlaneSegments,
    SphereRadius,
    SphereWidthSegments,
    SphereHeightSegments,
    CubeSize,
    CubeSegments,
    RotationX,
    RotationY,
    RotationZ,
    CameraPosX,
    CameraPosY,
    CameraPosZ,
    CameraTargetX,
    CameraTargetY,
    CameraTargetZ,
    CameraFov,
    NormalNoiseScaleX,
    NormalNoiseScaleY,
    NormalNoiseSpeed,
    NormalNoiseStrength,
    ColorNoiseScale,
    ColorNoiseSpeed,
    Color1,
    Color2,
    Color3,
    Color4,
    GradientMode,
    GradientShift,
    LightDirX,
    LightDirY,
    LightDirZ,
    DiffuseIntensity,
    AmbientIntensity,
    RimLightIntensity,
    ShowWireframe,
    BackgroundColor,
    BackgroundAlpha,
    AnimationSpeed,
    PauseAnimation,
    ExportWidth,
    ExportHeight,
    ExportQuality,
}

impl ParamKey {
    pub const ALL: [ParamKey; 45] = [
        Self::GeometryType,
        Self::PlaneWidth,
        Self::PlaneHeight,
        Self::PlaneSegments,
        Self::SphereRadius,
        Self::SphereWidthSegments,
        Self::SphereHeightSegments,
        Self::CubeSize,
        Self::CubeSegments,
        Self::RotationX,
        Self::RotationY,
        Self::RotationZ,
        Self::CameraPosX,
        Self::CameraPosY,
        Self::CameraPosZ,
        Self::CameraTargetX,
        Self::CameraTargetY,
        Self::CameraTargetZ,
        Self::CameraFov,
        Self::NormalNoiseScaleX,
        Self::NormalNoiseScaleY,
        Self::NormalNoiseSpeed,
        Self::NormalNoiseStrength,
        Self::ColorNoiseScale,
        Self::ColorNoiseSpeed,
        Self::Color1,
        Self::Color2,
        Self::Color3,
        Self::Color4,
        Self::GradientMode,
        Self::GradientShift,
        Self::LightDirX,
        Self::LightDirY,
        Self::LightDirZ,
        Self::DiffuseIntensity,
        Self::AmbientIntensity,
        Self::RimLightIntensity,
        Self::ShowWireframe,
        Self::BackgroundColor,
        Self::BackgroundAlpha,
        Self::AnimationSpeed,
        Self::PauseAnimation,
        Self::ExportWidth,
        Self::ExportHeight,
        Self::ExportQuality,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeometryType => "geometryType",
            Self::PlaneWidth => "planeWidth",
            Self::PlaneHeight => "planeHeight",
            Self::PlaneSegments => "planeSegments",
            Self::SphereRadius => "sphereRadius",
            Self::SphereWidthSegments => "sphereWidthSegments",
            Self::SphereHeightSegments => "sphereHeightSegments",
            Self::CubeSize => "cubeSize",
            Self::CubeSegments => "cubeSegments",
            Self::RotationX => "rotationX",
            Self::RotationY => "rotationY",
            Self::RotationZ => "rotationZ",
            Self::CameraPosX => "cameraPosX",
            Self::CameraPosY => "cameraPosY",
            Self::CameraPosZ => "cameraPosZ",
            Self::CameraTargetX => "cameraTargetX",
            Self::CameraTargetY => "cameraTargetY",
            Self::CameraTargetZ => "cameraTargetZ",
            Self::CameraFov => "cameraFov",
            Self::NormalNoiseScaleX => "normalNoiseScaleX",
            Self::NormalNoiseScaleY => "normalNoiseScaleY",
            Self::NormalNoiseSpeed => "normalNoiseSpeed",
            Self::NormalNoiseStrength => "normalNoiseStrength",
            Self::ColorNoiseScale => "colorNoiseScale",
            Self::ColorNoiseSpeed => "colorNoiseSpeed",
            Self::Color1 => "color1",
            Self::Color2 => "color2",
            Self::Color3 => "color3",
            Self::Color4 => "color4",
            Self::GradientMode => "gradientMode",
            Self::GradientShift => "gradientShift",
            Self::LightDirX => "lightDirX",
            Self::LightDirY => "lightDirY",
            Self::LightDirZ => "lightDirZ",
            Self::DiffuseIntensity => "diffuseIntensity",
            Self::AmbientIntensity => "ambientIntensity",
            Self::RimLightIntensity => "rimLightIntensity",
            Self::ShowWireframe => "showWireframe",
            Self::BackgroundColor => "backgroundColor",
            Self::BackgroundAlpha => "backgroundAlpha",
            Self::AnimationSpeed => "animationSpeed",
            Self::PauseAnimation => "pauseAnimation",
            Self::ExportWidth => "exportWidth",
            Self::ExportHeight => "exportHeight",
            Self::ExportQuality => "exportQuality",
        }
    }

    pub fn category(self) -> ParamCategory {
        use ParamKey::*;
        match self {
            GeometryType | PlaneWidth | PlaneHeight | PlaneSegments | SphereRadius
            | SphereWidthSegments | SphereHeightSegments | CubeSize | CubeSegments => {
                ParamCategory::Geometry
            }
            RotationX | RotationY | RotationZ => ParamCategory::Rotation,
            CameraPosX | CameraPosY | CameraPosZ | CameraTargetX | CameraTargetY
            | CameraTargetZ | CameraFov => ParamCategory::Camera,
            NormalNoiseScaleX | NormalNoiseScaleY | NormalNoiseSpeed | NormalNoiseStrength
            | ColorNoiseScale | ColorNoiseSpeed => ParamCategory::Noise,
            Color1 | Color2 | Color3 | Color4 | GradientMode | GradientShift => {
                ParamCategory::Color
            }
            LightDirX | LightDirY | LightDirZ | DiffuseIntensity | AmbientIntensity
            | RimLightIntensity => ParamCategory::Lighting,
            ShowWireframe | BackgroundColor | BackgroundAlpha => ParamCategory::Visualization,
            AnimationSpeed | PauseAnimation => ParamCategory::Animation,
            ExportWidth | ExportHeight | ExportQuality => ParamCategory::Export,
        }
    }

    pub fn kind(self) -> ParamKind {
        use ParamKey::*;
        match self {
            GeometryType => ParamKind::Enum(GEOMETRY_TYPES),
            GradientMode => ParamKind::Enum(GRADIENT_MODES),
            PlaneSegments | SphereWidthSegments | SphereHeightSegments | CubeSegments
            | ExportWidth | ExportHeight => ParamKind::Integer,
            Color1 | Color2 | Color3 | Color4 | BackgroundColor => ParamKind::Color,
            ShowWireframe | PauseAnimation => ParamKind::Bool,
            _ => ParamKind::Number,
        }
    }

    pub fn default_value(self) -> ParamValue {
        use ParamKey::*;
        match self {
            GeometryType => ParamValue::text("plane"),
            PlaneWidth => ParamValue::Number(6.0),
            PlaneHeight => ParamValue::Number(4.0),
            PlaneSegments => ParamValue::Number(128.0),
            SphereRadius => ParamValue::Number(2.0),
            SphereWidthSegments => ParamValue::Number(96.0),
            SphereHeightSegments => ParamValue::Number(64.0),
            CubeSize => ParamValue::Number(3.0),
            CubeSegments => ParamValue::Number(32.0),
            RotationX | RotationY | RotationZ => ParamValue::Number(0.0),
            CameraPosX | CameraPosY => ParamValue::Number(0.0),
            CameraPosZ => ParamValue::Number(8.0),
            CameraTargetX | CameraTargetY | CameraTargetZ => ParamValue::Number(0.0),
            CameraFov => ParamValue::Number(45.0),
            NormalNoiseScaleX | NormalNoiseScaleY => ParamValue::Number(1.5),
            NormalNoiseSpeed => ParamValue::Number(0.15),
            NormalNoiseStrength => ParamValue::Number(0.6),
            ColorNoiseScale => ParamValue::Number(2.0),
            ColorNoiseSpeed => ParamValue::Number(0.1),
            Color1 => ParamValue::text("#ff5005"),
            Color2 => ParamValue::text("#dbba95"),
            Color3 => ParamValue::text("#d0bce1"),
            Color4 => ParamValue::text("#1b1f3a"),
            GradientMode => ParamValue::text("noise"),
            GradientShift => ParamValue::Number(0.0),
            LightDirX => ParamValue::Number(0.4),
            LightDirY => ParamValue::Number(0.6),
            LightDirZ => ParamValue::Number(0.7),
            DiffuseIntensity => ParamValue::Number(0.6),
            AmbientIntensity => ParamValue::Number(0.5),
            RimLightIntensity => ParamValue::Number(0.2),
            ShowWireframe => ParamValue::Bool(false),
            BackgroundColor => ParamValue::text("#000000"),
            BackgroundAlpha => ParamValue::Number(1.0),
            AnimationSpeed => ParamValue::Number(1.0),
            PauseAnimation => ParamValue::Bool(false),
            ExportWidth => ParamValue::Number(1920.0),
            ExportHeight => ParamValue::Number(1080.0),
            ExportQuality => ParamValue::Number(0.92),
        }
    }

    /// Keys whose change requires the mesh to be rebuilt.
    pub fn affects_geometry(self) -> bool {
        self.category() == ParamCategory::Geometry
    }

    pub fn affects_camera(self) -> bool {
        self.category() == ParamCategory::Camera
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamKey {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == trimmed)
            .ok_or_else(|| {
                anyhow!(CodedError::usage(
                    ErrorCode::InvalidParameter,
                    format!("unknown parameter '{trimmed}'"),
                )
                .with_details(json!({ "provided": trimmed })))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParamValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryType {
    Plane,
    Sphere,
    Cube,
}

impl GeometryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plane => "plane",
            Self::Sphere => "sphere",
            Self::Cube => "cube",
        }
    }
}

impl FromStr for GeometryType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plane" => Ok(Self::Plane),
            "sphere" => Ok(Self::Sphere),
            "cube" => Ok(Self::Cube),
            other => bail!("unknown geometry type '{other}', expected plane, sphere or cube"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientMode {
    Linear,
    Radial,
    Noise,
}

impl GradientMode {
    pub fn index(self) -> u32 {
        match self {
            Self::Linear => 0,
            Self::Radial => 1,
            Self::Noise => 2,
        }
    }
}

impl FromStr for GradientMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "linear" => Ok(Self::Linear),
            "radial" => Ok(Self::Radial),
            "noise" => Ok(Self::Noise),
            other => bail!("unknown gradient mode '{other}'"),
        }
    }
}

/// The complete configuration of one shader instance. Every schema key is
/// always present; `color_stops` is the optional multi-stop gradient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSet {
    #[serde(flatten)]
    values: BTreeMap<ParamKey, ParamValue>,
    #[serde(rename = "colorStops", skip_serializing_if = "Option::is_none")]
    color_stops: Option<Vec<ColorStop>>,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ParameterSet {
    pub fn defaults() -> Self {
        Self {
            values: ParamKey::ALL
                .iter()
                .map(|key| (*key, key.default_value()))
                .collect(),
            color_stops: None,
        }
    }

    pub fn get(&self, key: ParamKey) -> ParamValue {
        self.values
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.default_value())
    }

    /// Writes a value without validation. The facade is the only intended
    /// caller; UI code goes through `ShaderFacade::update_param`.
    pub fn set(&mut self, key: ParamKey, value: ParamValue) -> ParamValue {
        self.values
            .insert(key, value)
            .unwrap_or_else(|| key.default_value())
    }

    pub fn number(&self, key: ParamKey) -> f64 {
        self.values
            .get(&key)
            .and_then(ParamValue::as_number)
            .or_else(|| key.default_value().as_number())
            .unwrap_or(0.0)
    }

    pub fn number_f32(&self, key: ParamKey) -> f32 {
        self.number(key) as f32
    }

    pub fn integer(&self, key: ParamKey) -> u32 {
        self.number(key).round().max(0.0) as u32
    }

    pub fn flag(&self, key: ParamKey) -> bool {
        self.values
            .get(&key)
            .and_then(ParamValue::as_bool)
            .unwrap_or(false)
    }

    pub fn text(&self, key: ParamKey) -> String {
        match self.values.get(&key) {
            Some(ParamValue::Text(value)) => value.clone(),
            _ => key.default_value().to_string(),
        }
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.text(ParamKey::GeometryType)
            .parse()
            .unwrap_or(GeometryType::Plane)
    }

    pub fn gradient_mode(&self) -> GradientMode {
        self.text(ParamKey::GradientMode)
            .parse()
            .unwrap_or(GradientMode::Noise)
    }

    pub fn vec3(&self, x: ParamKey, y: ParamKey, z: ParamKey) -> [f32; 3] {
        [self.number_f32(x), self.number_f32(y), self.number_f32(z)]
    }

    pub fn palette(&self) -> [String; 4] {
        [
            self.text(ParamKey::Color1),
            self.text(ParamKey::Color2),
            self.text(ParamKey::Color3),
            self.text(ParamKey::Color4),
        ]
    }

    pub fn color_stops(&self) -> Option<&[ColorStop]> {
        self.color_stops.as_deref()
    }

    pub fn set_color_stops(&mut self, stops: Option<Vec<ColorStop>>) {
        self.color_stops = stops.map(|mut stops| {
            normalize_color_stops(&mut stops);
            stops
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamKey, &ParamValue)> {
        self.values.iter().map(|(key, value)| (*key, value))
    }

    /// Keys whose value differs between `self` and `other`, in schema order.
    pub fn changed_keys(&self, other: &ParameterSet) -> Vec<ParamKey> {
        ParamKey::ALL
            .iter()
            .copied()
            .filter(|key| self.values.get(key) != other.values.get(key))
            .collect()
    }
}

/// A `key=value` override, as accepted by the CLI's `--set`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamOverride {
    pub key: ParamKey,
    pub value: ParamValue,
}

impl ParamOverride {
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((name, value)) = raw.split_once('=') else {
            return Err(anyhow!(CodedError::usage(
                ErrorCode::InvalidOverride,
                format!("override '{raw}' must use key=value form"),
            )));
        };
        let key: ParamKey = name.parse()?;
        let value = parse_value_for(key, value.trim())?;
        Ok(Self { key, value })
    }
}

/// Parses a textual value according to the key's declared kind.
pub fn parse_value_for(key: ParamKey, raw: &str) -> Result<ParamValue> {
    let kind = key.kind();
    let invalid = |expected: &str, example: &str| {
        anyhow!(CodedError::usage(
            ErrorCode::InvalidOverride,
            format!(
                "param '{key}': expected {expected}, got '{raw}' (example: --set {key}={example})"
            ),
        )
        .with_details(json!({ "param": key.as_str(), "provided": raw })))
    };

    match kind {
        ParamKind::Number => {
            let value = raw
                .parse::<f64>()
                .map_err(|_| invalid("float", "1.25"))?;
            if !value.is_finite() {
                return Err(invalid("finite float", "1.25"));
            }
            Ok(ParamValue::Number(value))
        }
        ParamKind::Integer => {
            let value = raw.parse::<i64>().map_err(|_| invalid("int", "64"))?;
            Ok(ParamValue::Number(value as f64))
        }
        ParamKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(ParamValue::Bool(true)),
            "false" | "0" => Ok(ParamValue::Bool(false)),
            _ => Err(invalid("bool", "true")),
        },
        ParamKind::Color => {
            if hex_color_pattern().is_match(raw) {
                Ok(ParamValue::text(raw.to_ascii_lowercase()))
            } else {
                Err(invalid("color", "#ff5005"))
            }
        }
        ParamKind::Enum(allowed) => {
            if allowed.contains(&raw) {
                Ok(ParamValue::text(raw))
            } else {
                Err(invalid(&format!("one of {}", allowed.join("|")), allowed[0]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_key_has_a_default_of_its_declared_kind() {
        let params = ParameterSet::defaults();
        for key in ParamKey::ALL {
            assert!(
                key.kind().accepts(&params.get(key)),
                "default for {key} does not match its kind"
            );
        }
    }

    #[test]
    fn serde_names_match_as_str() {
        for key in ParamKey::ALL {
            let encoded = serde_json::to_value(key).unwrap();
            assert_eq!(encoded, serde_json::Value::String(key.as_str().to_owned()));
            assert_eq!(key.as_str().parse::<ParamKey>().unwrap(), key);
        }
    }

    #[test]
    fn geometry_set_is_exactly_the_geometry_category() {
        let geometry = ParamKey::ALL
            .iter()
            .filter(|key| key.affects_geometry())
            .count();
        assert_eq!(geometry, 9);
        assert!(ParamKey::PlaneSegments.affects_geometry());
        assert!(!ParamKey::LightDirX.affects_geometry());
    }

    #[test]
    fn override_parsing_follows_declared_kind() {
        let parsed = ParamOverride::parse("planeSegments=64").unwrap();
        assert_eq!(parsed.value, ParamValue::Number(64.0));

        let error = ParamOverride::parse("planeSegments=3.5").unwrap_err();
        assert!(error.to_string().contains("expected int"));

        let error = ParamOverride::parse("animationSpeed=NaN").unwrap_err();
        assert!(error.to_string().contains("finite"));

        let flag = ParamOverride::parse("pauseAnimation=1").unwrap();
        assert_eq!(flag.value, ParamValue::Bool(true));

        let color = ParamOverride::parse("color1=#FF0000").unwrap();
        assert_eq!(color.value, ParamValue::text("#ff0000"));

        assert!(ParamOverride::parse("geometryType=torus").is_err());
        assert!(ParamOverride::parse("noSuchKey=1").is_err());
        assert!(ParamOverride::parse("color1").is_err());
    }

    #[test]
    fn changed_keys_lists_only_differences() {
        let before = ParameterSet::defaults();
        let mut after = before.clone();
        after.set(ParamKey::Color1, ParamValue::text("#000000"));
        after.set(ParamKey::CameraFov, ParamValue::Number(60.0));
        assert_eq!(
            before.changed_keys(&after),
            vec![ParamKey::CameraFov, ParamKey::Color1]
        );
    }

    #[test]
    fn color_stops_are_sorted_on_write() {
        let mut params = ParameterSet::defaults();
        params.set_color_stops(Some(vec![
            ColorStop::new(0.9, "#000000"),
            ColorStop::new(0.1, "#ffffff"),
        ]));
        let stops = params.color_stops().unwrap();
        assert_eq!(stops[0].position, 0.1);
    }
}
