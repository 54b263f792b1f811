use std::sync::OnceLock;

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Width of the lookup texture a multi-stop gradient is baked into.
pub const GRADIENT_TEXTURE_WIDTH: u32 = 256;
pub const MIN_COLOR_STOPS: usize = 2;
pub const MAX_COLOR_STOPS: usize = 16;

pub fn hex_color_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^#[0-9a-fA-F]{6}$").expect("hex color regex should compile")
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub fn from_hex(value: &str) -> Result<Self> {
        if !hex_color_pattern().is_match(value) {
            bail!("expected color in #rrggbb form, got '{value}'");
        }
        let channel = |range: std::ops::Range<usize>| -> Result<f32> {
            u8::from_str_radix(&value[range], 16)
                .map(|byte| f32::from(byte) / 255.0)
                .map_err(|error| anyhow!("invalid hex color '{value}': {error}"))
        };
        Ok(Self {
            r: channel(1..3)?,
            g: channel(3..5)?,
            b: channel(5..7)?,
        })
    }

    pub fn to_hex(self) -> String {
        let [r, g, b] = self.to_u8();
        format!("#{r:02x}{g:02x}{b:02x}")
    }

    pub fn to_u8(self) -> [u8; 3] {
        let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [quantize(self.r), quantize(self.g), quantize(self.b)]
    }

    pub fn as_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            r: self.r + (other.r - self.r) * t,
            g: self.g + (other.g - self.g) * t,
            b: self.b + (other.b - self.b) * t,
        }
    }
}

/// One point of a multi-stop gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColorStop {
    pub position: f32,
    pub color: String,
}

impl ColorStop {
    pub fn new(position: f32, color: impl Into<String>) -> Self {
        Self {
            position,
            color: color.into(),
        }
    }
}

pub fn validate_color_stops(stops: &[ColorStop]) -> Result<()> {
    if stops.len() < MIN_COLOR_STOPS || stops.len() > MAX_COLOR_STOPS {
        bail!(
            "gradient needs between {MIN_COLOR_STOPS} and {MAX_COLOR_STOPS} color stops, got {}",
            stops.len()
        );
    }
    for (index, stop) in stops.iter().enumerate() {
        if !stop.position.is_finite() || !(0.0..=1.0).contains(&stop.position) {
            bail!(
                "color stop {index} position must be within [0, 1], got {}",
                stop.position
            );
        }
        Rgb::from_hex(&stop.color).map_err(|error| anyhow!("color stop {index}: {error}"))?;
    }
    Ok(())
}

/// Sorts stops by position. Stable, so equal positions keep insertion order.
pub fn normalize_color_stops(stops: &mut [ColorStop]) {
    stops.sort_by(|a, b| a.position.total_cmp(&b.position));
}

/// Samples a sorted stop list at `t`, clamping outside the first/last stop.
pub fn sample_stops(stops: &[(f32, Rgb)], t: f32) -> Rgb {
    let Some(first) = stops.first() else {
        return Rgb {
            r: 0.0,
            g: 0.0,
            b: 0.0,
        };
    };
    if t <= first.0 {
        return first.1;
    }
    for pair in stops.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if t <= end.0 {
            let span = end.0 - start.0;
            if span <= f32::EPSILON {
                return end.1;
            }
            return start.1.lerp(end.1, (t - start.0) / span);
        }
    }
    stops[stops.len() - 1].1
}

pub fn parse_stops(stops: &[ColorStop]) -> Result<Vec<(f32, Rgb)>> {
    let mut parsed = stops
        .iter()
        .map(|stop| Ok((stop.position, Rgb::from_hex(&stop.color)?)))
        .collect::<Result<Vec<_>>>()?;
    parsed.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(parsed)
}

/// Bakes color stops into a `width`x1 RGBA8 row, the layout the fragment
/// shader samples as its gradient lookup texture.
pub fn stops_to_texture_data(stops: &[ColorStop], width: u32) -> Result<Vec<u8>> {
    validate_color_stops(stops)?;
    if width < 2 {
        bail!("gradient texture width must be at least 2, got {width}");
    }
    let parsed = parse_stops(stops)?;
    let mut data = Vec::with_capacity(width as usize * 4);
    for x in 0..width {
        let t = x as f32 / (width - 1) as f32;
        let [r, g, b] = sample_stops(&parsed, t).to_u8();
        data.extend_from_slice(&[r, g, b, 255]);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips_through_rgb() {
        let color = Rgb::from_hex("#4fe1b8").unwrap();
        assert_eq!(color.to_hex(), "#4fe1b8");
        assert!(Rgb::from_hex("#12GG33").is_err());
        assert!(Rgb::from_hex("4fe1b8").is_err());
    }

    #[test]
    fn texture_data_hits_stop_colors_at_the_ends() {
        let stops = vec![
            ColorStop::new(1.0, "#0000ff"),
            ColorStop::new(0.0, "#ff0000"),
        ];
        let data = stops_to_texture_data(&stops, 4).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(&data[0..4], &[255, 0, 0, 255]);
        assert_eq!(&data[12..16], &[0, 0, 255, 255]);
    }

    #[test]
    fn sampling_clamps_before_first_stop() {
        let stops = vec![
            ColorStop::new(0.25, "#ffffff"),
            ColorStop::new(0.75, "#000000"),
        ];
        let data = stops_to_texture_data(&stops, GRADIENT_TEXTURE_WIDTH).unwrap();
        assert_eq!(&data[0..4], &[255, 255, 255, 255]);
        let last = data.len() - 4;
        assert_eq!(&data[last..], &[0, 0, 0, 255]);
    }

    #[test]
    fn rejects_single_stop_and_out_of_range_positions() {
        assert!(validate_color_stops(&[ColorStop::new(0.0, "#ffffff")]).is_err());
        let error = validate_color_stops(&[
            ColorStop::new(0.0, "#ffffff"),
            ColorStop::new(1.5, "#000000"),
        ])
        .unwrap_err();
        assert!(error.to_string().contains("within [0, 1]"));
    }
}
