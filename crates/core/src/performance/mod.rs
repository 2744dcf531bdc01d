//! Adaptive quality regulation.
//!
//! The controller samples frame timing on a fixed interval and nudges a
//! [`PerformanceConfig`] one knob at a time to hold the target frame rate.
//! Between the degrade and upgrade thresholds it does nothing, which keeps
//! it from oscillating around the target.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PerformanceSettings;
use crate::events::{Observers, SubscriptionId};

const PARTICLE_FLOOR: f32 = 0.5;
const PARTICLE_CEILING: f32 = 1.0;
const PARTICLE_STEP: f32 = 0.1;
const REDUCED_VISIBLE_TARGETS: u32 = 15;
const FULL_VISIBLE_TARGETS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowQuality {
    Off,
    Low,
    Medium,
    High,
}

impl ShadowQuality {
    fn lower(self) -> Option<Self> {
        match self {
            ShadowQuality::High => Some(ShadowQuality::Medium),
            ShadowQuality::Medium => Some(ShadowQuality::Low),
            ShadowQuality::Low => Some(ShadowQuality::Off),
            ShadowQuality::Off => None,
        }
    }

    fn higher(self) -> Option<Self> {
        match self {
            ShadowQuality::Off => Some(ShadowQuality::Low),
            ShadowQuality::Low => Some(ShadowQuality::Medium),
            ShadowQuality::Medium => Some(ShadowQuality::High),
            ShadowQuality::High => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureQuality {
    Low,
    Medium,
    High,
}

/// Coarse hardware class used to pick the initial preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceTier {
    Low = 1,
    Mid = 2,
    High = 3,
}

/// Quality knobs read by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub particle_multiplier: f32,
    pub shadow_quality: ShadowQuality,
    pub anti_aliasing: bool,
    pub post_processing: bool,
    pub max_visible_targets: u32,
    pub render_distance: f32,
    pub reflections: bool,
    pub texture_quality: TextureQuality,
}

impl PerformanceConfig {
    pub fn preset(tier: DeviceTier) -> Self {
        match tier {
            DeviceTier::Low => Self {
                particle_multiplier: 0.5,
                shadow_quality: ShadowQuality::Off,
                anti_aliasing: false,
                post_processing: false,
                max_visible_targets: REDUCED_VISIBLE_TARGETS,
                render_distance: 50.0,
                reflections: false,
                texture_quality: TextureQuality::Low,
            },
            DeviceTier::Mid => Self {
                particle_multiplier: 0.8,
                shadow_quality: ShadowQuality::Medium,
                anti_aliasing: true,
                post_processing: false,
                max_visible_targets: 20,
                render_distance: 75.0,
                reflections: false,
                texture_quality: TextureQuality::Medium,
            },
            DeviceTier::High => Self {
                particle_multiplier: PARTICLE_CEILING,
                shadow_quality: ShadowQuality::High,
                anti_aliasing: true,
                post_processing: true,
                max_visible_targets: FULL_VISIBLE_TARGETS,
                render_distance: 100.0,
                reflections: true,
                texture_quality: TextureQuality::High,
            },
        }
    }
}

/// Knobs the controller may turn, in degrade priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Knob {
    Particles,
    PostProcessing,
    Shadows,
    AntiAliasing,
    VisibleTargets,
    Reflections,
}

impl Knob {
    pub const DEGRADE_ORDER: [Knob; 6] = [
        Knob::Particles,
        Knob::PostProcessing,
        Knob::Shadows,
        Knob::AntiAliasing,
        Knob::VisibleTargets,
        Knob::Reflections,
    ];

    pub const UPGRADE_ORDER: [Knob; 6] = [
        Knob::Reflections,
        Knob::VisibleTargets,
        Knob::AntiAliasing,
        Knob::Shadows,
        Knob::PostProcessing,
        Knob::Particles,
    ];

    /// Lowers this knob one step. Returns `false` when already at its floor.
    fn degrade(self, config: &mut PerformanceConfig) -> bool {
        match self {
            Knob::Particles => {
                if config.particle_multiplier <= PARTICLE_FLOOR + f32::EPSILON {
                    return false;
                }
                config.particle_multiplier =
                    step_particles(config.particle_multiplier, -PARTICLE_STEP).max(PARTICLE_FLOOR);
                true
            }
            Knob::PostProcessing => std::mem::replace(&mut config.post_processing, false),
            Knob::Shadows => match config.shadow_quality.lower() {
                Some(lower) => {
                    config.shadow_quality = lower;
                    true
                }
                None => false,
            },
            Knob::AntiAliasing => std::mem::replace(&mut config.anti_aliasing, false),
            Knob::VisibleTargets => {
                if config.max_visible_targets <= REDUCED_VISIBLE_TARGETS {
                    return false;
                }
                config.max_visible_targets = REDUCED_VISIBLE_TARGETS;
                true
            }
            Knob::Reflections => std::mem::replace(&mut config.reflections, false),
        }
    }

    /// Raises this knob one step. Returns `false` when already at its ceiling.
    fn upgrade(self, config: &mut PerformanceConfig) -> bool {
        match self {
            Knob::Particles => {
                if config.particle_multiplier >= PARTICLE_CEILING - f32::EPSILON {
                    return false;
                }
                config.particle_multiplier =
                    step_particles(config.particle_multiplier, PARTICLE_STEP).min(PARTICLE_CEILING);
                true
            }
            Knob::PostProcessing => !std::mem::replace(&mut config.post_processing, true),
            Knob::Shadows => match config.shadow_quality.higher() {
                Some(higher) => {
                    config.shadow_quality = higher;
                    true
                }
                None => false,
            },
            Knob::AntiAliasing => !std::mem::replace(&mut config.anti_aliasing, true),
            Knob::VisibleTargets => {
                if config.max_visible_targets >= FULL_VISIBLE_TARGETS {
                    return false;
                }
                config.max_visible_targets = FULL_VISIBLE_TARGETS;
                true
            }
            Knob::Reflections => !std::mem::replace(&mut config.reflections, true),
        }
    }
}

// Rounded to tenths so repeated steps never drift off the 0.1 grid.
fn step_particles(value: f32, delta: f32) -> f32 {
    ((value + delta) * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Degrade,
    Upgrade,
}

/// Emitted to observers whenever a knob moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityChange {
    pub knob: Knob,
    pub direction: Direction,
    pub fps: f64,
    pub config: PerformanceConfig,
}

/// Timing figures for one sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub fps: f64,
    pub frame_time_ms: f64,
    pub render_time_ms: f64,
    pub memory_mb: Option<f64>,
    pub audio_latency_ms: Option<f64>,
    pub device_tier: DeviceTier,
}

/// Hardware hints inspected once to classify the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceHints {
    pub cpu_cores: Option<usize>,
    pub memory_gb: Option<f32>,
    pub gpu_renderer: Option<String>,
}

impl DeviceHints {
    /// Best-effort inspection of the host. Unknown values stay `None`.
    pub fn detect() -> Self {
        Self {
            cpu_cores: std::thread::available_parallelism().ok().map(|n| n.get()),
            memory_gb: None,
            gpu_renderer: std::env::var("BEATREACH_GPU_RENDERER").ok(),
        }
    }

    pub fn tier(&self) -> DeviceTier {
        const SOFTWARE_OR_MOBILE: [&str; 6] =
            ["swiftshader", "llvmpipe", "software", "mali", "adreno", "powervr"];
        const DISCRETE: [&str; 4] = ["nvidia", "geforce", "radeon", "apple m"];

        let renderer = self
            .gpu_renderer
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if SOFTWARE_OR_MOBILE.iter().any(|name| renderer.contains(name)) {
            return DeviceTier::Low;
        }

        let cores = self.cpu_cores.unwrap_or(4);
        let memory = self.memory_gb.unwrap_or(4.0);
        if cores <= 2 || memory < 4.0 {
            DeviceTier::Low
        } else if (cores >= 8 && memory >= 8.0) || DISCRETE.iter().any(|name| renderer.contains(name)) {
            DeviceTier::High
        } else {
            DeviceTier::Mid
        }
    }
}

type Probe = Box<dyn FnMut() -> Option<f64> + Send>;

/// Closed-loop quality regulator. Keeps running while gameplay is paused.
pub struct PerformanceController {
    settings: PerformanceSettings,
    tier: DeviceTier,
    config: PerformanceConfig,
    frame_times: VecDeque<f64>,
    render_times: VecDeque<f64>,
    frames_in_interval: u32,
    interval_started_ms: Option<f64>,
    degrade_cursor: usize,
    upgrade_cursor: usize,
    last_direction: Option<Direction>,
    latest: Option<PerformanceSample>,
    render_probe: Option<Probe>,
    latency_probe: Option<Probe>,
    memory_probe: Option<Probe>,
    observers: Observers<QualityChange>,
}

impl PerformanceController {
    /// Classifies the device once and seeds the matching preset.
    pub fn new(settings: PerformanceSettings, hints: &DeviceHints) -> Self {
        let tier = hints.tier();
        tracing::info!(?tier, "seeding performance preset");
        Self::with_tier(settings, tier)
    }

    pub fn with_tier(settings: PerformanceSettings, tier: DeviceTier) -> Self {
        let window = settings.window_len.max(1);
        Self {
            settings,
            tier,
            config: PerformanceConfig::preset(tier),
            frame_times: VecDeque::with_capacity(window),
            render_times: VecDeque::with_capacity(window),
            frames_in_interval: 0,
            interval_started_ms: None,
            degrade_cursor: 0,
            upgrade_cursor: 0,
            last_direction: None,
            latest: None,
            render_probe: None,
            latency_probe: None,
            memory_probe: None,
            observers: Observers::new(),
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    pub fn device_tier(&self) -> DeviceTier {
        self.tier
    }

    pub fn latest_sample(&self) -> Option<&PerformanceSample> {
        self.latest.as_ref()
    }

    pub fn set_render_time_probe(&mut self, probe: impl FnMut() -> Option<f64> + Send + 'static) {
        self.render_probe = Some(Box::new(probe));
    }

    pub fn set_audio_latency_probe(&mut self, probe: impl FnMut() -> Option<f64> + Send + 'static) {
        self.latency_probe = Some(Box::new(probe));
    }

    pub fn set_memory_probe(&mut self, probe: impl FnMut() -> Option<f64> + Send + 'static) {
        self.memory_probe = Some(Box::new(probe));
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&QualityChange) + Send + 'static,
    {
        self.observers.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Records one rendered frame. When an interval boundary is crossed the
    /// interval is summarised, evaluated and the sample returned.
    pub fn record_frame(&mut self, now_ms: f64, frame_time_ms: f64) -> Option<PerformanceSample> {
        push_bounded(&mut self.frame_times, frame_time_ms, self.settings.window_len);
        if let Some(render) = self.render_probe.as_mut().and_then(|probe| probe()) {
            push_bounded(&mut self.render_times, render, self.settings.window_len);
        }

        // The first frame only opens the interval.
        let Some(started) = self.interval_started_ms else {
            self.interval_started_ms = Some(now_ms);
            return None;
        };
        self.frames_in_interval += 1;

        let elapsed = now_ms - started;
        if elapsed < self.settings.update_interval_ms {
            return None;
        }

        let fps = f64::from(self.frames_in_interval) * 1000.0 / elapsed;
        self.frames_in_interval = 0;
        self.interval_started_ms = Some(now_ms);

        let sample = PerformanceSample {
            fps,
            frame_time_ms: mean(&self.frame_times),
            render_time_ms: if self.render_times.is_empty() {
                mean(&self.frame_times)
            } else {
                mean(&self.render_times)
            },
            memory_mb: self.memory_probe.as_mut().and_then(|probe| probe()),
            audio_latency_ms: self.latency_probe.as_mut().and_then(|probe| probe()),
            device_tier: self.tier,
        };
        self.latest = Some(sample);
        self.evaluate(fps);
        Some(sample)
    }

    /// One regulation step for a measured frame rate. Changes at most one
    /// knob and returns the change, if any.
    pub fn evaluate(&mut self, fps: f64) -> Option<QualityChange> {
        let target = self.settings.target_fps;
        let direction = if fps < target * self.settings.degrade_ratio {
            Direction::Degrade
        } else if fps > target * self.settings.upgrade_ratio {
            Direction::Upgrade
        } else {
            return None;
        };

        if self.last_direction != Some(direction) {
            self.degrade_cursor = 0;
            self.upgrade_cursor = 0;
        }

        let (order, cursor) = match direction {
            Direction::Degrade => (&Knob::DEGRADE_ORDER, &mut self.degrade_cursor),
            Direction::Upgrade => (&Knob::UPGRADE_ORDER, &mut self.upgrade_cursor),
        };

        // Walk the priority list from the cursor so every knob gets a turn
        // before any knob moves a second time.
        let mut changed = None;
        for offset in 0..order.len() {
            let index = (*cursor + offset) % order.len();
            let knob = order[index];
            let moved = match direction {
                Direction::Degrade => knob.degrade(&mut self.config),
                Direction::Upgrade => knob.upgrade(&mut self.config),
            };
            if moved {
                *cursor = (index + 1) % order.len();
                changed = Some(knob);
                break;
            }
        }

        let knob = changed?;
        self.last_direction = Some(direction);
        let change = QualityChange {
            knob,
            direction,
            fps,
            config: self.config,
        };
        tracing::debug!(?knob, ?direction, fps, "performance config adjusted");
        self.observers.emit(&change);
        Some(change)
    }
}

impl fmt::Debug for PerformanceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceController")
            .field("settings", &self.settings)
            .field("tier", &self.tier)
            .field("config", &self.config)
            .field("frame_times", &self.frame_times.len())
            .field("latest", &self.latest)
            .finish()
    }
}

fn push_bounded(window: &mut VecDeque<f64>, value: f64, limit: usize) {
    window.push_back(value);
    while window.len() > limit.max(1) {
        window.pop_front();
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn controller(tier: DeviceTier) -> PerformanceController {
        PerformanceController::with_tier(PerformanceSettings::default(), tier)
    }

    #[test]
    fn sustained_low_fps_degrades_one_knob_per_tick_in_order() {
        let mut controller = controller(DeviceTier::High);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        controller.subscribe(move |change: &QualityChange| sink.lock().unwrap().push(change.knob));

        let mut previous = *controller.config();
        for _ in 0..5 {
            controller.evaluate(42.0).unwrap();
            let current = *controller.config();
            assert_eq!(changed_fields(&previous, &current), 1);
            previous = current;
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Knob::Particles,
                Knob::PostProcessing,
                Knob::Shadows,
                Knob::AntiAliasing,
                Knob::VisibleTargets,
            ]
        );
        let config = controller.config();
        assert_eq!(config.particle_multiplier, 0.9);
        assert_eq!(config.shadow_quality, ShadowQuality::Medium);
        assert!(config.reflections);
    }

    #[test]
    fn hysteresis_band_holds() {
        let mut controller = controller(DeviceTier::Mid);
        let before = *controller.config();
        for fps in [51.0, 54.0, 57.0] {
            assert!(controller.evaluate(fps).is_none());
        }
        assert_eq!(*controller.config(), before);
    }

    #[test]
    fn upgrades_walk_the_reverse_order() {
        let mut controller = controller(DeviceTier::Low);
        let knobs: Vec<Knob> = (0..6)
            .map(|_| controller.evaluate(60.0).unwrap().knob)
            .collect();

        assert_eq!(knobs, Knob::UPGRADE_ORDER.to_vec());
        let config = controller.config();
        assert!(config.reflections);
        assert_eq!(config.max_visible_targets, 30);
        assert_eq!(config.shadow_quality, ShadowQuality::Low);
        assert!((config.particle_multiplier - 0.6).abs() < 1e-6);
    }

    #[test]
    fn saturated_controller_stops_adjusting() {
        let mut low = controller(DeviceTier::Low);
        assert!(low.evaluate(10.0).is_none());

        let mut high = controller(DeviceTier::High);
        assert!(high.evaluate(120.0).is_none());
        assert_eq!(*high.config(), PerformanceConfig::preset(DeviceTier::High));
    }

    #[test]
    fn degradation_reaches_the_floor() {
        let mut controller = controller(DeviceTier::High);
        while controller.evaluate(20.0).is_some() {}

        assert_eq!(*controller.config(), PerformanceConfig {
            render_distance: 100.0,
            texture_quality: TextureQuality::High,
            ..PerformanceConfig::preset(DeviceTier::Low)
        });
    }

    #[test]
    fn record_frame_samples_once_per_interval() {
        let mut controller = controller(DeviceTier::Mid);
        controller.set_render_time_probe(|| Some(4.0));
        controller.set_audio_latency_probe(|| Some(12.0));

        let mut sample = None;
        let mut now = 0.0;
        while sample.is_none() {
            now += 25.0;
            sample = controller.record_frame(now, 25.0);
        }

        let sample = sample.unwrap();
        assert_eq!(now, 1025.0);
        assert!((sample.fps - 40.0).abs() < 0.5);
        assert_eq!(sample.frame_time_ms, 25.0);
        assert_eq!(sample.render_time_ms, 4.0);
        assert_eq!(sample.audio_latency_ms, Some(12.0));
        assert_eq!(controller.config().particle_multiplier, 0.7);
    }

    #[test]
    fn rolling_windows_are_bounded() {
        let mut controller = controller(DeviceTier::Mid);
        for frame in 0..500 {
            controller.record_frame(frame as f64, 1.0);
        }
        assert!(controller.frame_times.len() <= 60);
    }

    #[test]
    fn device_tier_from_hints() {
        let low = DeviceHints {
            cpu_cores: Some(16),
            memory_gb: Some(32.0),
            gpu_renderer: Some("Google SwiftShader".into()),
        };
        let mid = DeviceHints {
            cpu_cores: Some(4),
            memory_gb: Some(8.0),
            gpu_renderer: None,
        };
        let high = DeviceHints {
            cpu_cores: Some(8),
            memory_gb: Some(16.0),
            gpu_renderer: Some("ANGLE (Intel)".into()),
        };

        assert_eq!(low.tier(), DeviceTier::Low);
        assert_eq!(mid.tier(), DeviceTier::Mid);
        assert_eq!(high.tier(), DeviceTier::High);
        assert_eq!(
            PerformanceController::new(PerformanceSettings::default(), &high).config(),
            &PerformanceConfig::preset(DeviceTier::High)
        );
    }

    fn changed_fields(a: &PerformanceConfig, b: &PerformanceConfig) -> usize {
        [
            a.particle_multiplier != b.particle_multiplier,
            a.shadow_quality != b.shadow_quality,
            a.anti_aliasing != b.anti_aliasing,
            a.post_processing != b.post_processing,
            a.max_visible_targets != b.max_visible_targets,
            a.render_distance != b.render_distance,
            a.reflections != b.reflections,
            a.texture_quality != b.texture_quality,
        ]
        .iter()
        .filter(|changed| **changed)
        .count()
    }
}
