use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AdaptiveSettings {
    pub enabled: bool,
    pub burst_window_ms: u64,
    /// Rapid calls tolerated before segment counts start dropping.
    pub burst_threshold: u32,
    pub max_rapid_count: u32,
    pub max_reduction: f64,
    pub min_segments: u32,
    pub quiet_period_ms: u64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            burst_window_ms: 300,
            burst_threshold: 3,
            max_rapid_count: 10,
            max_reduction: 0.75,
            min_segments: 32,
            quiet_period_ms: 300,
        }
    }
}

impl AdaptiveSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=0.95).contains(&self.max_reduction) {
            anyhow::bail!(
                "adaptive.max_reduction must be within [0, 0.95], got {}",
                self.max_reduction
            );
        }
        if self.max_rapid_count == 0 {
            anyhow::bail!("adaptive.max_rapid_count must be > 0");
        }
        if self.min_segments == 0 {
            anyhow::bail!("adaptive.min_segments must be > 0");
        }
        Ok(())
    }
}

/// Serializable view of the controller, for the CLI and tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdaptiveState {
    pub enabled: bool,
    pub rapid_count: u32,
    pub segment_scale: f64,
}

/// Burst detector that lowers mesh subdivision while geometry is rebuilt in
/// rapid succession and hands full resolution back after a quiet period.
#[derive(Debug, Clone)]
pub struct AdaptiveResolution {
    settings: AdaptiveSettings,
    last_call: Option<Instant>,
    rapid_count: u32,
    segment_scale: f64,
}

impl AdaptiveResolution {
    pub fn new(settings: AdaptiveSettings) -> Self {
        Self {
            settings,
            last_call: None,
            rapid_count: 0,
            segment_scale: 1.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn is_reduced(&self) -> bool {
        self.segment_scale < 1.0
    }

    pub fn segment_scale(&self) -> f64 {
        self.segment_scale
    }

    pub fn min_segments(&self) -> u32 {
        self.settings.min_segments
    }

    pub fn state(&self) -> AdaptiveState {
        AdaptiveState {
            enabled: self.settings.enabled,
            rapid_count: self.rapid_count,
            segment_scale: self.segment_scale,
        }
    }

    /// Records a geometry rebuild at `now` and returns the segment scale that
    /// rebuild should use.
    pub fn record_rebuild(&mut self, now: Instant) -> f64 {
        if !self.settings.enabled {
            return 1.0;
        }

        let window = Duration::from_millis(self.settings.burst_window_ms);
        let rapid = self
            .last_call
            .is_some_and(|last| now.saturating_duration_since(last) <= window);
        self.last_call = Some(now);

        if rapid {
            self.rapid_count = (self.rapid_count + 1).min(self.settings.max_rapid_count);
        } else {
            self.rapid_count = 0;
        }

        self.segment_scale = if self.rapid_count > self.settings.burst_threshold {
            let per_step = self.settings.max_reduction / f64::from(self.settings.max_rapid_count);
            let reduction =
                (per_step * f64::from(self.rapid_count)).min(self.settings.max_reduction);
            1.0 - reduction
        } else {
            1.0
        };

        if self.is_reduced() {
            tracing::debug!(
                rapid_count = self.rapid_count,
                segment_scale = self.segment_scale,
                "adaptive resolution reducing segments"
            );
        }
        self.segment_scale
    }

    /// True once a reduction is active and no rebuild happened for the quiet
    /// period; the caller should rebuild at full resolution and call `reset`.
    pub fn needs_restore(&self, now: Instant) -> bool {
        let quiet = Duration::from_millis(self.settings.quiet_period_ms);
        self.is_reduced()
            && self
                .last_call
                .is_some_and(|last| now.saturating_duration_since(last) > quiet)
    }

    pub fn reset(&mut self) {
        self.rapid_count = 0;
        self.segment_scale = 1.0;
        self.last_call = None;
    }

    /// Returns true when a reduction was active, meaning the caller owes one
    /// full-resolution rebuild.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        let was_reduced = self.is_reduced();
        self.settings.enabled = enabled;
        if !enabled {
            self.reset();
            return was_reduced;
        }
        false
    }

    /// Applies the current scale to a segment count, never going below the
    /// floor and never above the requested count.
    pub fn scale_segments(&self, segments: u32) -> u32 {
        scale_segments(segments, self.segment_scale, self.settings.min_segments)
    }
}

pub fn scale_segments(segments: u32, scale: f64, min_segments: u32) -> u32 {
    if scale >= 1.0 {
        return segments;
    }
    let scaled = (f64::from(segments) * scale).round() as u32;
    scaled.max(min_segments).min(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst(controller: &mut AdaptiveResolution, start: Instant, calls: u32) -> (Instant, f64) {
        let mut now = start;
        let mut scale = 1.0;
        for _ in 0..calls {
            scale = controller.record_rebuild(now);
            now += Duration::from_millis(50);
        }
        (now, scale)
    }

    #[test]
    fn first_three_rapid_calls_keep_full_resolution() {
        let mut controller = AdaptiveResolution::new(AdaptiveSettings::default());
        let (_, scale) = burst(&mut controller, Instant::now(), 4);
        assert_eq!(scale, 1.0);
        assert_eq!(controller.state().rapid_count, 3);
    }

    #[test]
    fn reduction_grows_and_caps_at_75_percent() {
        let mut controller = AdaptiveResolution::new(AdaptiveSettings::default());
        let (_, scale) = burst(&mut controller, Instant::now(), 5);
        assert!((scale - 0.7).abs() < 1e-9);

        let (_, scale) = burst(&mut controller, Instant::now() + Duration::from_secs(1), 30);
        assert!((scale - 0.25).abs() < 1e-9);
        assert_eq!(controller.state().rapid_count, 10);
    }

    #[test]
    fn slow_calls_reset_the_counter() {
        let mut controller = AdaptiveResolution::new(AdaptiveSettings::default());
        let start = Instant::now();
        let (end, _) = burst(&mut controller, start, 8);
        assert!(controller.is_reduced());
        let scale = controller.record_rebuild(end + Duration::from_millis(400));
        assert_eq!(scale, 1.0);
        assert_eq!(controller.state().rapid_count, 0);
    }

    #[test]
    fn quiet_period_requests_restore() {
        let mut controller = AdaptiveResolution::new(AdaptiveSettings::default());
        let start = Instant::now();
        let (end, _) = burst(&mut controller, start, 8);
        assert!(!controller.needs_restore(end));
        assert!(controller.needs_restore(end + Duration::from_millis(400)));
    }

    #[test]
    fn disabling_reports_owed_rebuild_only_when_reduced() {
        let mut controller = AdaptiveResolution::new(AdaptiveSettings::default());
        assert!(!controller.set_enabled(false));
        controller.set_enabled(true);
        burst(&mut controller, Instant::now(), 8);
        assert!(controller.set_enabled(false));
        assert_eq!(controller.state().rapid_count, 0);
        assert_eq!(controller.record_rebuild(Instant::now()), 1.0);
    }

    #[test]
    fn scaled_segments_respect_floor() {
        assert_eq!(scale_segments(128, 0.25, 32), 32);
        assert_eq!(scale_segments(256, 0.5, 32), 128);
        assert_eq!(scale_segments(16, 0.25, 32), 16);
        assert_eq!(scale_segments(64, 1.0, 32), 64);
    }
}
