//! Beat-map data model.
//!
//! A [`BeatMap`] is built once at load time and is read-only afterwards. All
//! constructors validate the map, so a value of this type always carries a
//! positive tempo and targets with unique, ascending timestamps.

use std::collections::HashSet;
use std::path::Path;

use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::generator;
use crate::{BeatReachError, Result};

/// Identity of a target inside one beat-map. Assigned in time order, and
/// independent of the timestamp so windowing never doubles as de-duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Normal,
    Hold,
    Slide,
}

/// Presentation hint attached to every target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualHint {
    pub color: [f32; 4],
    pub size: f32,
}

/// A single timed, positioned object the player must hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default = "unassigned_id")]
    pub id: TargetId,
    /// Song-relative time in milliseconds.
    pub time_ms: u64,
    pub position: Vec3,
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_duration_ms: Option<u64>,
    pub hint: VisualHint,
}

fn unassigned_id() -> TargetId {
    TargetId(u32::MAX)
}

impl Target {
    /// Creates a normal target with the default hint for its kind.
    pub fn new(time_ms: u64, position: Vec3) -> Self {
        Self {
            id: unassigned_id(),
            time_ms,
            position,
            kind: TargetKind::Normal,
            hold_duration_ms: None,
            hint: VisualHint {
                color: kind_color(TargetKind::Normal),
                size: 1.0,
            },
        }
    }
}

/// Base colour used for each target kind.
pub fn kind_color(kind: TargetKind) -> [f32; 4] {
    match kind {
        TargetKind::Normal => [0.2, 0.8, 1.0, 1.0],
        TargetKind::Hold => [1.0, 0.6, 0.1, 1.0],
        TargetKind::Slide => [0.8, 0.3, 1.0, 1.0],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    pub fn preset(self) -> DifficultyPreset {
        match self {
            Difficulty::Easy => DifficultyPreset {
                beat_density: 1.0,
                position_variance: 0.1,
                special_ratio: 0.1,
                speed_multiplier: 0.8,
            },
            Difficulty::Normal => DifficultyPreset {
                beat_density: 2.0,
                position_variance: 0.2,
                special_ratio: 0.2,
                speed_multiplier: 1.0,
            },
            Difficulty::Hard => DifficultyPreset {
                beat_density: 4.0,
                position_variance: 0.3,
                special_ratio: 0.3,
                speed_multiplier: 1.3,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = BeatReachError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "normal" => Ok(Difficulty::Normal),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(BeatReachError::msg(format!("unknown difficulty `{s}`"))),
        }
    }
}

/// Generation parameters selected by a [`Difficulty`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyPreset {
    /// Ticks kept per four beats.
    pub beat_density: f32,
    pub position_variance: f32,
    pub special_ratio: f32,
    pub speed_multiplier: f32,
}

impl DifficultyPreset {
    /// Every `tick_step()`-th beat tick is kept.
    pub fn tick_step(&self) -> usize {
        if self.beat_density <= 0.0 || !self.beat_density.is_finite() {
            return usize::MAX;
        }
        ((4.0 / self.beat_density).floor() as usize).max(1)
    }
}

/// The ordered collection of targets for one song and difficulty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatMap {
    pub song_id: String,
    pub bpm: f64,
    pub offset_ms: u64,
    pub difficulty: Difficulty,
    pub approach_speed: f32,
    targets: Vec<Target>,
}

impl BeatMap {
    /// Builds a map from an externally supplied target list. Targets are
    /// sorted by time and renumbered; duplicate times and non-positive tempo
    /// are rejected.
    pub fn new(
        song_id: impl Into<String>,
        bpm: f64,
        offset_ms: u64,
        difficulty: Difficulty,
        mut targets: Vec<Target>,
    ) -> Result<Self> {
        validate_bpm(bpm)?;
        targets.sort_by_key(|target| target.time_ms);

        let mut seen = HashSet::with_capacity(targets.len());
        for target in &targets {
            if !seen.insert(target.time_ms) {
                return Err(BeatReachError::DuplicateTargetTime(target.time_ms));
            }
            if !target.position.is_finite() {
                return Err(BeatReachError::InvalidBeatMap(format!(
                    "target at {} ms has a non-finite position",
                    target.time_ms
                )));
            }
        }

        for (index, target) in targets.iter_mut().enumerate() {
            target.id = TargetId(index as u32);
        }

        Ok(Self {
            song_id: song_id.into(),
            bpm,
            offset_ms,
            difficulty,
            approach_speed: difficulty.preset().speed_multiplier,
            targets,
        })
    }

    /// Runs the procedural generator and wraps its output.
    pub fn generate<R: Rng + ?Sized>(
        song_id: impl Into<String>,
        bpm: f64,
        duration_ms: u64,
        offset_ms: u64,
        difficulty: Difficulty,
        rng: &mut R,
    ) -> Result<Self> {
        let targets = generator::generate(bpm, duration_ms, offset_ms, difficulty, rng)?;
        Self::new(song_id, bpm, offset_ms, difficulty, targets)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: BeatMap = serde_json::from_str(raw)?;
        Self::new(
            parsed.song_id,
            parsed.bpm,
            parsed.offset_ms,
            parsed.difficulty,
            parsed.targets,
        )
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn beat_interval_ms(&self) -> f64 {
        60_000.0 / self.bpm
    }
}

pub(crate) fn validate_bpm(bpm: f64) -> Result<()> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(())
    } else {
        Err(BeatReachError::InvalidBeatMap(format!(
            "bpm must be positive, got {bpm}"
        )))
    }
}
