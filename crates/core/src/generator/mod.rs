//! Procedural beat-map generation.
//!
//! Targets are placed on beat ticks and laid out by a small library of
//! parametric patterns. Randomness is always injected so fixtures can use a
//! seeded [`StdRng`].

use std::f32::consts::TAU;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::beatmap::{self, kind_color, BeatMap, Difficulty, Target, TargetKind, VisualHint};
use crate::Result;

/// Number of ticks that share one placement pattern.
pub const PATTERN_BLOCK: usize = 16;

/// Half extent of the play volume on the x and y axes.
const PLAY_EXTENT: f32 = 1.0;

/// Parametric placement patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Line,
    Circle,
    ZigZag,
    Random,
}

impl Pattern {
    pub const ALL: [Pattern; 4] = [Pattern::Line, Pattern::Circle, Pattern::ZigZag, Pattern::Random];

    pub fn pick<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.random_range(0..Self::ALL.len())]
    }

    /// Raw, unperturbed position for the `step`-th tick of a block, where
    /// only every `stride`-th tick carries a target.
    pub fn position<R: Rng + ?Sized>(self, step: usize, stride: usize, rng: &mut R) -> Vec3 {
        let phase = (step % PATTERN_BLOCK) as f32 / PATTERN_BLOCK as f32;
        match self {
            Pattern::Line => Vec3::new(-0.8 + 1.6 * phase, 0.0, 0.0),
            Pattern::Circle => {
                let angle = phase * TAU;
                Vec3::new(0.6 * angle.cos(), 0.6 * angle.sin(), 0.0)
            }
            Pattern::ZigZag => {
                let y = if (step / stride.max(1)) % 2 == 0 { 0.5 } else { -0.5 };
                Vec3::new(-0.8 + 1.6 * phase, y, 0.0)
            }
            Pattern::Random => Vec3::new(
                rng.random_range(-0.8..=0.8),
                rng.random_range(-0.8..=0.8),
                0.0,
            ),
        }
    }
}

/// Produces the ordered targets for a tempo, duration and difficulty.
///
/// The result is empty when the duration is shorter than one beat. The only
/// error is a non-positive or non-finite tempo.
pub fn generate<R: Rng + ?Sized>(
    bpm: f64,
    duration_ms: u64,
    offset_ms: u64,
    difficulty: Difficulty,
    rng: &mut R,
) -> Result<Vec<Target>> {
    beatmap::validate_bpm(bpm)?;
    let interval = 60_000.0 / bpm;
    let duration = duration_ms as f64;
    if duration < interval {
        return Ok(Vec::new());
    }

    Ok(place_on_ticks(beat_ticks(interval, duration, offset_ms), interval, difficulty, rng))
}

/// Millisecond beat times in `[offset, offset + duration)`, numbered in
/// order. Below one millisecond per beat the rounded times would repeat, so
/// every millisecond of the span gets exactly one tick instead.
fn beat_ticks(interval: f64, duration: f64, offset_ms: u64) -> Vec<(usize, u64)> {
    if interval < 1.0 {
        let last_beat = ((duration / interval).ceil() - 1.0).max(0.0);
        let last_ms = ((last_beat * interval).round() as u64).min(duration as u64);
        return (0..=last_ms)
            .map(|ms| (ms as usize, offset_ms + ms))
            .collect();
    }

    // At one millisecond or more per beat, rounding keeps times strictly
    // increasing.
    (0..)
        .map(|tick: usize| (tick, offset_ms + (tick as f64 * interval).round() as u64))
        .take_while(|(tick, _)| (*tick as f64) * interval < duration)
        .collect()
}

/// Lays targets out on `(tick_index, time_ms)` pairs, keeping only the ticks
/// the difficulty's density admits. Shared with the energy-based path.
pub(crate) fn place_on_ticks<R, I>(
    ticks: I,
    interval_ms: f64,
    difficulty: Difficulty,
    rng: &mut R,
) -> Vec<Target>
where
    R: Rng + ?Sized,
    I: IntoIterator<Item = (usize, u64)>,
{
    let preset = difficulty.preset();
    let step = preset.tick_step();
    let size = hint_size(difficulty);

    let mut targets = Vec::new();
    let mut pattern = Pattern::Line;
    for (tick, time_ms) in ticks {
        if tick % PATTERN_BLOCK == 0 {
            pattern = Pattern::pick(rng);
        }
        if tick % step != 0 {
            continue;
        }

        let raw = pattern.position(tick, step, rng);
        let position = perturb(raw, preset.position_variance, rng);

        let kind = if rng.random::<f32>() < preset.special_ratio {
            if rng.random_bool(0.5) {
                TargetKind::Hold
            } else {
                TargetKind::Slide
            }
        } else {
            TargetKind::Normal
        };

        let mut target = Target::new(time_ms, position);
        target.kind = kind;
        target.hold_duration_ms = (kind == TargetKind::Hold).then(|| interval_ms.round() as u64);
        target.hint = VisualHint {
            color: kind_color(kind),
            size,
        };
        targets.push(target);
    }

    targets
}

fn perturb<R: Rng + ?Sized>(raw: Vec3, variance: f32, rng: &mut R) -> Vec3 {
    if variance <= 0.0 {
        return raw;
    }
    let jitter = Vec3::new(
        rng.random_range(-variance..=variance),
        rng.random_range(-variance..=variance),
        0.0,
    );
    (raw + jitter).clamp(Vec3::splat(-PLAY_EXTENT), Vec3::splat(PLAY_EXTENT))
}

fn hint_size(difficulty: Difficulty) -> f32 {
    match difficulty {
        Difficulty::Easy => 1.2,
        Difficulty::Normal => 1.0,
        Difficulty::Hard => 0.8,
    }
}

/// Owns the random source used for generation.
#[derive(Debug)]
pub struct BeatMapGenerator {
    rng: StdRng,
}

impl BeatMapGenerator {
    /// Reproducible generator for fixtures and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn generate(
        &mut self,
        song_id: impl Into<String>,
        bpm: f64,
        duration_ms: u64,
        offset_ms: u64,
        difficulty: Difficulty,
    ) -> Result<BeatMap> {
        BeatMap::generate(song_id, bpm, duration_ms, offset_ms, difficulty, &mut self.rng)
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
