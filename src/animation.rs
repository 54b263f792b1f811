use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationState {
    Stopped,
    Running,
}

/// Outcome of a start/stop request; only `Changed` results emit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct AnimationLoop {
    state: AnimationState,
    last_tick: Option<Instant>,
    frame_count: u64,
}

impl AnimationLoop {
    pub fn new(paused: bool) -> Self {
        Self {
            state: if paused {
                AnimationState::Stopped
            } else {
                AnimationState::Running
            },
            last_tick: None,
            frame_count: 0,
        }
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AnimationState::Running
    }

    pub fn start(&mut self) -> Transition {
        match self.state {
            AnimationState::Running => Transition::Unchanged,
            AnimationState::Stopped => {
                self.state = AnimationState::Running;
                self.last_tick = None;
                Transition::Changed
            }
        }
    }

    pub fn stop(&mut self) -> Transition {
        match self.state {
            AnimationState::Stopped => Transition::Unchanged,
            AnimationState::Running => {
                self.state = AnimationState::Stopped;
                self.last_tick = None;
                Transition::Changed
            }
        }
    }

    /// Seconds elapsed since the previous tick while running. The first tick
    /// after a start only anchors the clock.
    pub fn advance(&mut self, now: Instant) -> f32 {
        if !self.is_running() {
            return 0.0;
        }
        let delta = self
            .last_tick
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_tick = Some(now);
        delta
    }

    pub fn count_frame(&mut self) -> u64 {
        self.frame_count += 1;
        self.frame_count
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Ends the loop regardless of state.
    pub fn halt(&mut self) {
        self.state = AnimationState::Stopped;
        self.last_tick = None;
    }
}

/// Animation values captured before an image export and restored after it.
#[derive(Debug, Clone, Copy)]
pub struct AnimationSnapshot {
    pub speed: f32,
    pub shader_time: f32,
    pub was_running: bool,
    pub captured_at: Instant,
}

impl AnimationSnapshot {
    /// Shader time to restore: advanced by `speed × elapsed` only when the
    /// animation was running, so a paused shader does not drift.
    pub fn restored_time(&self, now: Instant) -> f32 {
        if !self.was_running {
            return self.shader_time;
        }
        let elapsed = now.saturating_duration_since(self.captured_at).as_secs_f32();
        self.shader_time + self.speed * elapsed
    }
}
