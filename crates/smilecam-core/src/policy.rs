//! Smile classification and the auto-capture cooldown gate.

use serde::{Deserialize, Serialize};

/// User-adjustable session settings. Read fresh on every detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Happiness score a face must exceed to count as smiling, in [0, 1].
    pub smile_threshold: f32,
    /// Minimum time between two auto-captures.
    pub cooldown_ms: u64,
    pub auto_capture: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            smile_threshold: 0.7,
            cooldown_ms: 3000,
            auto_capture: true,
        }
    }
}

impl Settings {
    /// Set the threshold, clamped into [0, 1]. NaN is ignored.
    pub fn set_smile_threshold(&mut self, threshold: f32) {
        if !threshold.is_nan() {
            self.smile_threshold = threshold.clamp(0.0, 1.0);
        }
    }
}

/// A face is smiling only if its happiness score is strictly above the threshold.
pub fn is_smiling(happiness: f32, threshold: f32) -> bool {
    happiness > threshold
}

/// Remembers when auto-capture last fired.
#[derive(Debug, Clone, Copy, Default)]
pub struct CooldownGate {
    last_fire_ms: Option<u64>,
}

impl CooldownGate {
    /// Whether a capture at `now_ms` would respect the cooldown.
    /// Elapsed time must be strictly greater than `cooldown_ms`.
    pub fn is_open(&self, now_ms: u64, cooldown_ms: u64) -> bool {
        match self.last_fire_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > cooldown_ms,
        }
    }

    /// Start a new cooldown window. Call only once the capture has succeeded.
    pub fn record(&mut self, now_ms: u64) {
        self.last_fire_ms = Some(now_ms);
    }

    pub fn last_fire_ms(&self) -> Option<u64> {
        self.last_fire_ms
    }
}
