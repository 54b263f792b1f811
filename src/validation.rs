use std::collections::HashMap;
use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::gradient::hex_color_pattern;
use crate::params::{ParamKey, ParamKind, ParamValue, GEOMETRY_TYPES, GRADIENT_MODES};

/// Advisory verdict for a single parameter value. Never mutates state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "suggestedValue", skip_serializing_if = "Option::is_none")]
    pub suggested_value: Option<ParamValue>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: None,
            suggested_value: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            suggested_value: None,
        }
    }

    fn suggesting(mut self, value: ParamValue) -> Self {
        self.suggested_value = Some(value);
        self
    }
}

pub type Predicate = Arc<dyn Fn(&ParamValue) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum ValidationRule {
    /// Inclusive numeric range; `integer` additionally rejects fractions.
    Range { min: f64, max: f64, integer: bool },
    Pattern { pattern: Regex, description: &'static str },
    OneOf(&'static [&'static str]),
    Custom { description: String, predicate: Predicate },
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { min, max, integer } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .field("integer", integer)
                .finish(),
            Self::Pattern { pattern, .. } => {
                f.debug_tuple("Pattern").field(&pattern.as_str()).finish()
            }
            Self::OneOf(allowed) => f.debug_tuple("OneOf").field(allowed).finish(),
            Self::Custom { description, .. } => {
                f.debug_tuple("Custom").field(description).finish()
            }
        }
    }
}

impl ValidationRule {
    pub fn range(min: f64, max: f64) -> Self {
        Self::Range {
            min,
            max,
            integer: false,
        }
    }

    pub fn integer(min: f64, max: f64) -> Self {
        Self::Range {
            min,
            max,
            integer: true,
        }
    }

    pub fn hex_color() -> Self {
        Self::Pattern {
            pattern: hex_color_pattern().clone(),
            description: "a #rrggbb hex color",
        }
    }

    pub fn custom(
        description: impl Into<String>,
        predicate: impl Fn(&ParamValue) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Custom {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Short human-readable form, used by `params` listings.
    pub fn describe(&self) -> String {
        match self {
            Self::Range { min, max, integer } => {
                let kind = if *integer { "int" } else { "number" };
                format!("{kind} in [{min}, {max}]")
            }
            Self::Pattern { description, .. } => (*description).to_owned(),
            Self::OneOf(allowed) => format!("one of {}", allowed.join("|")),
            Self::Custom { description, .. } => description.clone(),
        }
    }

    fn check(&self, key: ParamKey, value: &ParamValue) -> ValidationResult {
        match self {
            Self::Range { min, max, integer } => {
                let Some(number) = value.as_number() else {
                    return ValidationResult::invalid(format!("{key} must be a number"));
                };
                if !number.is_finite() {
                    return ValidationResult::invalid(format!("{key} must be finite"));
                }
                if number < *min || number > *max {
                    let clamped = number.clamp(*min, *max);
                    let suggested = if *integer { clamped.round() } else { clamped };
                    return ValidationResult::invalid(format!(
                        "{key} must be between {min} and {max}, got {number}"
                    ))
                    .suggesting(ParamValue::Number(suggested));
                }
                if *integer && number.fract() != 0.0 {
                    return ValidationResult::invalid(format!(
                        "{key} must be an integer, got {number}"
                    ))
                    .suggesting(ParamValue::Number(number.round().clamp(*min, *max)));
                }
                ValidationResult::ok()
            }
            Self::Pattern {
                pattern,
                description,
            } => match value.as_text() {
                Some(text) if pattern.is_match(text) => ValidationResult::ok(),
                Some(text) => {
                    ValidationResult::invalid(format!("{key} must be {description}, got '{text}'"))
                }
                None => ValidationResult::invalid(format!("{key} must be {description}")),
            },
            Self::OneOf(allowed) => match value.as_text() {
                Some(text) if allowed.contains(&text) => ValidationResult::ok(),
                _ => ValidationResult::invalid(format!(
                    "{key} must be one of {}, got '{value}'",
                    allowed.join(", ")
                )),
            },
            Self::Custom {
                description,
                predicate,
            } => {
                if predicate(value) {
                    ValidationResult::ok()
                } else {
                    ValidationResult::invalid(format!("{key} failed check: {description}"))
                }
            }
        }
    }
}

/// Per-parameter rules, defined once at startup and looked up by key.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: HashMap<ParamKey, ValidationRule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        use ParamKey::*;

        let mut rules = HashMap::new();
        rules.insert(GeometryType, ValidationRule::OneOf(GEOMETRY_TYPES));
        for key in [PlaneWidth, PlaneHeight, SphereRadius, CubeSize] {
            rules.insert(key, ValidationRule::range(0.1, 20.0));
        }
        rules.insert(PlaneSegments, ValidationRule::integer(1.0, 512.0));
        rules.insert(SphereWidthSegments, ValidationRule::integer(3.0, 256.0));
        rules.insert(SphereHeightSegments, ValidationRule::integer(2.0, 256.0));
        rules.insert(CubeSegments, ValidationRule::integer(1.0, 128.0));
        for key in [RotationX, RotationY, RotationZ] {
            rules.insert(key, ValidationRule::range(-TAU, TAU));
        }
        for key in [
            CameraPosX,
            CameraPosY,
            CameraPosZ,
            CameraTargetX,
            CameraTargetY,
            CameraTargetZ,
        ] {
            rules.insert(key, ValidationRule::range(-100.0, 100.0));
        }
        rules.insert(CameraFov, ValidationRule::range(1.0, 179.0));
        for key in [NormalNoiseScaleX, NormalNoiseScaleY, ColorNoiseScale] {
            rules.insert(key, ValidationRule::range(0.0, 20.0));
        }
        for key in [NormalNoiseSpeed, NormalNoiseStrength, ColorNoiseSpeed] {
            rules.insert(key, ValidationRule::range(0.0, 5.0));
        }
        for key in [Color1, Color2, Color3, Color4, BackgroundColor] {
            rules.insert(key, ValidationRule::hex_color());
        }
        rules.insert(GradientMode, ValidationRule::OneOf(GRADIENT_MODES));
        rules.insert(GradientShift, ValidationRule::range(-1.0, 1.0));
        for key in [LightDirX, LightDirY, LightDirZ] {
            rules.insert(key, ValidationRule::range(-1.0, 1.0));
        }
        for key in [
            DiffuseIntensity,
            AmbientIntensity,
            RimLightIntensity,
            BackgroundAlpha,
            ExportQuality,
        ] {
            rules.insert(key, ValidationRule::range(0.0, 1.0));
        }
        rules.insert(AnimationSpeed, ValidationRule::range(0.0, 10.0));
        for key in [ExportWidth, ExportHeight] {
            rules.insert(key, ValidationRule::integer(16.0, 8192.0));
        }

        Self { rules }
    }

    pub fn with_rule(mut self, key: ParamKey, rule: ValidationRule) -> Self {
        self.rules.insert(key, rule);
        self
    }

    pub fn rule(&self, key: ParamKey) -> Option<&ValidationRule> {
        self.rules.get(&key)
    }

    /// Schema type only. Writes that skip range and pattern rules still
    /// go through this.
    pub fn validate_type(key: ParamKey, value: &ParamValue) -> ValidationResult {
        let kind = key.kind();
        if kind.accepts(value) {
            return ValidationResult::ok();
        }
        let expected = match kind {
            ParamKind::Number | ParamKind::Integer => "a finite number",
            ParamKind::Color | ParamKind::Enum(_) => "a string",
            ParamKind::Bool => "a boolean",
        };
        ValidationResult::invalid(format!(
            "{key} expects {expected}, got {}",
            value.type_name()
        ))
    }

    /// Checks the schema type first, then the key's rule if one exists.
    pub fn validate(&self, key: ParamKey, value: &ParamValue) -> ValidationResult {
        let typed = Self::validate_type(key, value);
        if !typed.valid {
            return typed;
        }

        match self.rules.get(&key) {
            Some(rule) => rule.check(key, value),
            None => ValidationResult::ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_intensity_suggests_clamped_value() {
        let rules = RuleSet::standard();
        let result = rules.validate(ParamKey::DiffuseIntensity, &ParamValue::Number(5.0));
        assert!(!result.valid);
        assert_eq!(result.suggested_value, Some(ParamValue::Number(1.0)));
        assert!(result.message.unwrap().contains("between 0 and 1"));
    }

    #[test]
    fn sphere_segments_respect_lower_bound() {
        let rules = RuleSet::standard();
        let result = rules.validate(ParamKey::SphereWidthSegments, &ParamValue::Number(2.0));
        assert!(!result.valid);
        assert_eq!(result.suggested_value, Some(ParamValue::Number(3.0)));
        assert!(
            rules
                .validate(ParamKey::SphereWidthSegments, &ParamValue::Number(256.0))
                .valid
        );
    }

    #[test]
    fn fractional_segment_count_suggests_rounded_value() {
        let rules = RuleSet::standard();
        let result = rules.validate(ParamKey::PlaneSegments, &ParamValue::Number(63.6));
        assert!(!result.valid);
        assert_eq!(result.suggested_value, Some(ParamValue::Number(64.0)));
    }

    #[test]
    fn hex_pattern_rejects_without_suggestion() {
        let rules = RuleSet::standard();
        let result = rules.validate(ParamKey::Color1, &ParamValue::text("red"));
        assert!(!result.valid);
        assert!(result.suggested_value.is_none());
        assert!(rules.validate(ParamKey::Color1, &ParamValue::text("#ff0000")).valid);
    }

    #[test]
    fn type_mismatch_is_invalid_even_without_rule() {
        let rules = RuleSet::empty();
        let result = rules.validate(ParamKey::ShowWireframe, &ParamValue::Number(1.0));
        assert!(!result.valid);
        assert!(rules.validate(ParamKey::LightDirX, &ParamValue::Number(50.0)).valid);
    }

    #[test]
    fn custom_predicate_rules_are_consulted() {
        let rules = RuleSet::standard().with_rule(
            ParamKey::AnimationSpeed,
            ValidationRule::custom("speed must be a multiple of 0.5", |value| {
                value
                    .as_number()
                    .map(|speed| (speed * 2.0).fract() == 0.0)
                    .unwrap_or(false)
            }),
        );
        assert!(rules.validate(ParamKey::AnimationSpeed, &ParamValue::Number(1.5)).valid);
        assert!(!rules.validate(ParamKey::AnimationSpeed, &ParamValue::Number(1.2)).valid);
    }
}
