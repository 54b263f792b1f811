use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::params::{ParamCategory, ParamKey, ParamValue};

const MAX_WINDOW_MS: u64 = 1000;

/// Quiet period, per parameter category, before a UI-driven update is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebounceWindows {
    pub geometry_ms: u64,
    pub rotation_ms: u64,
    pub camera_ms: u64,
    pub noise_ms: u64,
    pub color_ms: u64,
    pub lighting_ms: u64,
    pub visualization_ms: u64,
    pub animation_ms: u64,
    pub export_ms: u64,
}

impl Default for DebounceWindows {
    fn default() -> Self {
        Self {
            geometry_ms: 150,
            rotation_ms: 50,
            camera_ms: 50,
            noise_ms: 100,
            color_ms: 100,
            lighting_ms: 100,
            visualization_ms: 50,
            animation_ms: 250,
            export_ms: 250,
        }
    }
}

impl DebounceWindows {
    pub fn window_ms(&self, category: ParamCategory) -> u64 {
        match category {
            ParamCategory::Geometry => self.geometry_ms,
            ParamCategory::Rotation => self.rotation_ms,
            ParamCategory::Camera => self.camera_ms,
            ParamCategory::Noise => self.noise_ms,
            ParamCategory::Color => self.color_ms,
            ParamCategory::Lighting => self.lighting_ms,
            ParamCategory::Visualization => self.visualization_ms,
            ParamCategory::Animation => self.animation_ms,
            ParamCategory::Export => self.export_ms,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for category in ParamCategory::ALL {
            let window = self.window_ms(category);
            if window > MAX_WINDOW_MS {
                bail!(
                    "debounce.{}_ms must be at most {MAX_WINDOW_MS} (got {window})",
                    category.as_str()
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    value: ParamValue,
    deadline: Instant,
}

/// Coalesces rapid updates per key: a new schedule for a key replaces its
/// value and pushes its deadline out by the category window.
#[derive(Debug, Clone, Default)]
pub struct Debouncer {
    windows: DebounceWindows,
    pending: BTreeMap<ParamKey, PendingUpdate>,
}

impl Debouncer {
    pub fn new(windows: DebounceWindows) -> Self {
        Self {
            windows,
            pending: BTreeMap::new(),
        }
    }

    pub fn schedule(&mut self, key: ParamKey, value: ParamValue, now: Instant) -> Instant {
        let window = Duration::from_millis(self.windows.window_ms(key.category()));
        let deadline = now + window;
        self.pending.insert(key, PendingUpdate { value, deadline });
        deadline
    }

    /// Removes and returns every update whose deadline has passed, oldest
    /// deadline first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(ParamKey, ParamValue)> {
        let mut due = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(key, pending)| (*key, pending.deadline))
            .collect::<Vec<_>>();
        due.sort_by_key(|(key, deadline)| (*deadline, *key));

        due.into_iter()
            .filter_map(|(key, _)| self.pending.remove(&key).map(|pending| (key, pending.value)))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_schedules_coalesce_to_latest_value() {
        let mut debouncer = Debouncer::new(DebounceWindows::default());
        let start = Instant::now();
        debouncer.schedule(ParamKey::PlaneSegments, ParamValue::Number(40.0), start);
        debouncer.schedule(
            ParamKey::PlaneSegments,
            ParamValue::Number(48.0),
            start + Duration::from_millis(100),
        );

        assert!(debouncer
            .take_due(start + Duration::from_millis(200))
            .is_empty());
        let due = debouncer.take_due(start + Duration::from_millis(250));
        assert_eq!(due, vec![(ParamKey::PlaneSegments, ParamValue::Number(48.0))]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn categories_use_their_own_windows() {
        let mut debouncer = Debouncer::new(DebounceWindows::default());
        let start = Instant::now();
        debouncer.schedule(ParamKey::CameraPosX, ParamValue::Number(1.0), start);
        debouncer.schedule(ParamKey::AnimationSpeed, ParamValue::Number(2.0), start);

        let due = debouncer.take_due(start + Duration::from_millis(60));
        assert_eq!(due, vec![(ParamKey::CameraPosX, ParamValue::Number(1.0))]);
        assert_eq!(debouncer.len(), 1);
        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_millis(250))
        );
    }

    #[test]
    fn oversized_window_is_rejected() {
        let windows = DebounceWindows {
            color_ms: 5000,
            ..DebounceWindows::default()
        };
        let error = windows.validate().unwrap_err();
        assert!(error.to_string().contains("debounce.color_ms"));
    }
}
