// =============================================================================
// Volume state — spike detection against a rolling mean
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Rolling window used for the volume mean.
const WINDOW: usize = 20;

const SPIKE_FACTOR: f64 = 1.5;
const BURST_FACTOR: f64 = 2.5;
const AGGRESSIVE_FACTOR: f64 = 3.5;

/// Volume participation state relative to the rolling mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeState {
    Normal,
    Spike,
    Burst,
    Aggressive,
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Spike => write!(f, "SPIKE"),
            Self::Burst => write!(f, "BURST"),
            Self::Aggressive => write!(f, "AGGRESSIVE"),
        }
    }
}

/// Rolling volume tracker for one instrument.
#[derive(Debug, Default)]
pub struct VolumeTracker {
    window: VecDeque<f64>,
}

impl VolumeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rolling_mean(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Ratio of `volume` to the rolling mean (1.0 when no history yet).
    pub fn surge_ratio(&self, volume: u64) -> f64 {
        let mean = self.rolling_mean();
        if mean <= 0.0 {
            1.0
        } else {
            volume as f64 / mean
        }
    }

    /// Classify the new observation, then absorb it into the window.
    pub fn observe(&mut self, volume: u64) -> VolumeState {
        let ratio = self.surge_ratio(volume);
        let state = classify_ratio(ratio);

        self.window.push_back(volume as f64);
        while self.window.len() > WINDOW {
            self.window.pop_front();
        }

        state
    }
}

fn classify_ratio(ratio: f64) -> VolumeState {
    if ratio >= AGGRESSIVE_FACTOR {
        VolumeState::Aggressive
    } else if ratio >= BURST_FACTOR {
        VolumeState::Burst
    } else if ratio >= SPIKE_FACTOR {
        VolumeState::Spike
    } else {
        VolumeState::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> VolumeTracker {
        let mut tracker = VolumeTracker::new();
        for _ in 0..10 {
            tracker.observe(1000);
        }
        tracker
    }

    #[test]
    fn states_step_up_with_ratio() {
        let mut tracker = seeded();
        assert_eq!(tracker.observe(1200), VolumeState::Normal);

        let mut tracker = seeded();
        assert_eq!(tracker.observe(1600), VolumeState::Spike);

        let mut tracker = seeded();
        assert_eq!(tracker.observe(2600), VolumeState::Burst);

        let mut tracker = seeded();
        assert_eq!(tracker.observe(3600), VolumeState::Aggressive);
    }

    #[test]
    fn first_observation_is_normal() {
        let mut tracker = VolumeTracker::new();
        assert_eq!(tracker.observe(50_000), VolumeState::Normal);
    }

    #[test]
    fn window_is_bounded() {
        let mut tracker = VolumeTracker::new();
        for i in 0..100 {
            tracker.observe(1000 + i);
        }
        assert!(tracker.window.len() <= WINDOW);
        assert!(tracker.rolling_mean() > 1000.0);
    }
}
