//! Hand-position input.
//!
//! Trackers publish into a single-slot cell: the writer overwrites, the
//! reader only ever sees the most recent sample. Bursts are coalesced and
//! nothing is queued.

use std::f32::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard};

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::MotionConfig;
use crate::{BeatReachError, Result};

/// Latest known hand position. An absent position means "no hand".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub position: Option<Vec3>,
    pub confidence: f32,
}

impl MotionSample {
    pub fn at(position: Vec3, confidence: f32) -> Self {
        Self {
            position: Some(position),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Full payload a tracker produces for one reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionUpdate {
    pub position: Option<Vec3>,
    pub confidence: f32,
    pub raw_landmarks: Option<Vec<Vec3>>,
    pub error: Option<String>,
}

impl From<&MotionUpdate> for MotionSample {
    fn from(update: &MotionUpdate) -> Self {
        match update.position {
            Some(position) if update.error.is_none() => Self::at(position, update.confidence),
            _ => Self::none(),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    sample: MotionSample,
    landmarks: Option<Vec<Vec3>>,
    published_at_ms: Option<f64>,
}

/// Creates a connected writer/reader pair over one slot.
pub fn motion_slot() -> (MotionWriter, MotionReader) {
    let shared = Arc::new(Mutex::new(Slot::default()));
    (
        MotionWriter {
            shared: shared.clone(),
        },
        MotionReader { shared },
    )
}

// A poisoned slot still holds a complete sample, so both sides keep going.
fn lock(shared: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer side of the slot, held by the active motion source.
#[derive(Debug, Clone)]
pub struct MotionWriter {
    shared: Arc<Mutex<Slot>>,
}

impl MotionWriter {
    /// Overwrites the slot. The newest update always wins.
    pub fn publish(&self, now_ms: f64, update: &MotionUpdate) {
        let mut slot = lock(&self.shared);
        slot.sample = MotionSample::from(update);
        slot.landmarks = update.raw_landmarks.clone();
        slot.published_at_ms = Some(now_ms);
    }

    /// Forgets the last sample, e.g. when tracking is lost or disposed.
    pub fn clear(&self) {
        let mut slot = lock(&self.shared);
        slot.sample = MotionSample::none();
        slot.landmarks = None;
    }
}

/// Consumer side of the slot, read once per frame by the judgement path.
#[derive(Debug, Clone)]
pub struct MotionReader {
    shared: Arc<Mutex<Slot>>,
}

impl MotionReader {
    pub fn latest(&self) -> MotionSample {
        lock(&self.shared).sample
    }

    pub fn landmarks(&self) -> Option<Vec<Vec3>> {
        lock(&self.shared).landmarks.clone()
    }

    pub fn published_at_ms(&self) -> Option<f64> {
        lock(&self.shared).published_at_ms
    }
}

/// Contract every hand tracker implements. Sampling is cooperative: the host
/// calls [`MotionSource::poll`] from its loop and the source publishes when
/// it has a fresh reading.
pub trait MotionSource: Send {
    fn name(&self) -> &'static str;

    fn initialize(&mut self, writer: MotionWriter) -> Result<()>;

    fn poll(&mut self, now_ms: f64);

    fn pause(&mut self);

    fn resume(&mut self);

    /// Releases the source. Must be safe to call repeatedly and before
    /// [`MotionSource::initialize`].
    fn dispose(&mut self);

    fn is_tracking(&self) -> bool;
}

/// Stand-in tracker producing plausible positions on a Lissajous path with a
/// little jitter, at a fixed interval.
#[derive(Debug)]
pub struct SyntheticMotionSource {
    writer: Option<MotionWriter>,
    interval_ms: f64,
    last_emit_ms: Option<f64>,
    paused: bool,
    rng: StdRng,
}

impl SyntheticMotionSource {
    pub fn new(interval_ms: f64, seed: u64) -> Self {
        Self {
            writer: None,
            interval_ms,
            last_emit_ms: None,
            paused: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_config(config: &MotionConfig) -> Self {
        Self::new(config.synthetic_interval_ms, config.synthetic_seed)
    }

    fn position_at(&mut self, now_ms: f64) -> Vec3 {
        let t = (now_ms / 1000.0) as f32;
        let jitter = Vec3::new(
            self.rng.random_range(-0.05..=0.05),
            self.rng.random_range(-0.05..=0.05),
            0.0,
        );
        Vec3::new(0.7 * (t * TAU * 0.25).sin(), 0.5 * (t * TAU * 0.4).sin(), 0.0) + jitter
    }
}

impl MotionSource for SyntheticMotionSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn initialize(&mut self, writer: MotionWriter) -> Result<()> {
        self.writer = Some(writer);
        self.last_emit_ms = None;
        Ok(())
    }

    fn poll(&mut self, now_ms: f64) {
        if self.paused {
            return;
        }
        let due = self
            .last_emit_ms
            .map(|last| now_ms - last >= self.interval_ms)
            .unwrap_or(true);
        if !due {
            return;
        }

        let position = self.position_at(now_ms);
        let confidence = self.rng.random_range(0.6..=0.9);
        if let Some(writer) = &self.writer {
            writer.publish(
                now_ms,
                &MotionUpdate {
                    position: Some(position),
                    confidence,
                    raw_landmarks: None,
                    error: None,
                },
            );
            self.last_emit_ms = Some(now_ms);
        }
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn dispose(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.clear();
        }
    }

    fn is_tracking(&self) -> bool {
        self.writer.is_some() && !self.paused
    }
}

/// Outcome of [`MotionTracker::initialize`]. Setup failures are reported
/// here while gameplay continues on synthetic data.
#[derive(Debug)]
pub struct MotionInit {
    pub is_tracking: bool,
    pub source: &'static str,
    pub fallback: bool,
    pub error: Option<BeatReachError>,
}

/// Owns the active motion source and the writer side of the slot.
pub struct MotionTracker {
    source: Box<dyn MotionSource>,
    writer: MotionWriter,
    reader: MotionReader,
    config: MotionConfig,
    last_poll_ms: Option<f64>,
    disposed: bool,
}

impl MotionTracker {
    pub fn new(source: Box<dyn MotionSource>, config: MotionConfig) -> Self {
        let (writer, reader) = motion_slot();
        Self {
            source,
            writer,
            reader,
            config,
            last_poll_ms: None,
            disposed: false,
        }
    }

    /// Tracker running on synthetic data from the start.
    pub fn synthetic(config: MotionConfig) -> Self {
        Self::new(Box::new(SyntheticMotionSource::from_config(&config)), config)
    }

    pub fn reader(&self) -> MotionReader {
        self.reader.clone()
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Starts the configured source, replacing it with the synthetic
    /// generator if it fails.
    pub fn initialize(&mut self) -> MotionInit {
        if self.disposed {
            return MotionInit {
                is_tracking: false,
                source: self.source.name(),
                fallback: false,
                error: Some(BeatReachError::MotionInit("tracker already disposed".into())),
            };
        }
        match self.source.initialize(self.writer.clone()) {
            Ok(()) => MotionInit {
                is_tracking: self.source.is_tracking(),
                source: self.source.name(),
                fallback: false,
                error: None,
            },
            Err(err) => {
                tracing::warn!(source = self.source.name(), %err, "motion source failed, using synthetic fallback");
                self.source.dispose();
                let mut fallback = SyntheticMotionSource::from_config(&self.config);
                // The synthetic source cannot fail to initialize.
                let _ = fallback.initialize(self.writer.clone());
                self.source = Box::new(fallback);
                MotionInit {
                    is_tracking: self.source.is_tracking(),
                    source: self.source.name(),
                    fallback: true,
                    error: Some(err),
                }
            }
        }
    }

    /// Gives the source a chance to sample, at most once per
    /// `sample_interval_ms`.
    pub fn poll(&mut self, now_ms: f64) {
        if self.disposed {
            return;
        }
        if let Some(last) = self.last_poll_ms {
            if now_ms - last < self.config.sample_interval_ms {
                return;
            }
        }
        self.last_poll_ms = Some(now_ms);
        self.source.poll(now_ms);
    }

    pub fn pause(&mut self) {
        self.source.pause();
    }

    pub fn resume(&mut self) {
        self.source.resume();
    }

    pub fn is_tracking(&self) -> bool {
        !self.disposed && self.source.is_tracking()
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.source.dispose();
        self.writer.clear();
    }
}

impl std::fmt::Debug for MotionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionTracker")
            .field("source", &self.source.name())
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Drop for MotionTracker {
    fn drop(&mut self) {
        self.dispose();
    }
}
