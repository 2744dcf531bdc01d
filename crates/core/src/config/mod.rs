use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub judgement: JudgementConfig,
    pub session: SessionConfig,
    pub performance: PerformanceSettings,
    pub motion: MotionConfig,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections fall back to their
    /// defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Temporal and spatial tolerances used when judging a target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgementConfig {
    pub perfect_window_ms: f64,
    pub good_window_ms: f64,
    pub perfect_radius: f32,
    pub good_radius: f32,
    /// Samples reporting less confidence than this are treated as "no hand".
    pub min_confidence: f32,
}

impl Default for JudgementConfig {
    fn default() -> Self {
        Self {
            perfect_window_ms: 50.0,
            good_window_ms: 100.0,
            perfect_radius: 0.3,
            good_radius: 0.6,
            min_confidence: 0.0,
        }
    }
}

/// Lifecycle timings for a play session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long before its time a target becomes active.
    pub spawn_lead_ms: f64,
    /// How long after its time a target stays active.
    pub despawn_trail_ms: f64,
    pub countdown_ms: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            spawn_lead_ms: 1000.0,
            despawn_trail_ms: 500.0,
            countdown_ms: 3000.0,
        }
    }
}

/// Tuning for the adaptive performance controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub target_fps: f64,
    pub update_interval_ms: f64,
    /// Upper bound on the rolling frame/render time windows.
    pub window_len: usize,
    pub degrade_ratio: f64,
    pub upgrade_ratio: f64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            update_interval_ms: 1000.0,
            window_len: 60,
            degrade_ratio: 0.85,
            upgrade_ratio: 0.95,
        }
    }
}

/// Configuration of the motion sampling loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Minimum spacing between two source polls (~33 Hz by default).
    pub sample_interval_ms: f64,
    /// Interval of the synthetic fallback generator.
    pub synthetic_interval_ms: f64,
    pub synthetic_seed: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 30.0,
            synthetic_interval_ms: 100.0,
            synthetic_seed: 0x5eed,
        }
    }
}

/// Parameters for the energy-based beat-map generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub frame_size: usize,
    pub hop_size: usize,
    /// Fraction of the loudest frame's energy a peak must exceed.
    pub threshold: f32,
    /// Frames inspected on each side of a peak candidate.
    pub peak_window: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            hop_size: 512,
            threshold: 0.35,
            peak_window: 4,
        }
    }
}
