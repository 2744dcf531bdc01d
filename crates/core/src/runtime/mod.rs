//! Host loop glue. [`GameRuntime`] owns one session together with its motion
//! tracker, audio source and performance controller, and drives all of them
//! from a single per-frame call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::AudioSource;
use crate::config::AppConfig;
use crate::motion::{MotionInit, MotionTracker};
use crate::performance::{PerformanceController, PerformanceSample};
use crate::session::{GameSession, GameState};
use crate::{BeatMap, BeatReachError, Result};

/// Shared "still wanted" flag. Cloned handles can request shutdown from
/// elsewhere; the runtime notices on its next call and disposes itself.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GameRuntime {
    session: GameSession,
    motion: MotionTracker,
    audio: Box<dyn AudioSource>,
    controller: PerformanceController,
    liveness: Liveness,
    audio_offset_ms: f64,
    audio_started: bool,
    disposed: bool,
}

impl GameRuntime {
    pub fn new(
        beatmap: BeatMap,
        config: &AppConfig,
        motion: MotionTracker,
        audio: Box<dyn AudioSource>,
        controller: PerformanceController,
    ) -> Self {
        let session = GameSession::new(beatmap, config.judgement, config.session, motion.reader());
        Self {
            session,
            motion,
            audio,
            controller,
            liveness: Liveness::new(),
            audio_offset_ms: 0.0,
            audio_started: false,
            disposed: false,
        }
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut GameSession {
        &mut self.session
    }

    pub fn controller(&self) -> &PerformanceController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut PerformanceController {
        &mut self.controller
    }

    pub fn motion(&self) -> &MotionTracker {
        &self.motion
    }

    /// Latency calibration: playback runs this far ahead of game time.
    /// Takes effect when the song starts.
    pub fn set_audio_offset(&mut self, offset_ms: f64) {
        self.audio_offset_ms = if offset_ms.is_finite() { offset_ms } else { 0.0 };
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Brings up motion tracking and loads the song, then marks the session
    /// ready. A motion failure is not fatal: the tracker falls back to
    /// synthetic input and the failure is reported in the returned
    /// [`MotionInit`].
    pub fn initialize(&mut self) -> Result<MotionInit> {
        self.ensure_alive()?;

        let motion = self.motion.initialize();
        if let Some(err) = &motion.error {
            tracing::warn!(%err, source = motion.source, "motion tracking degraded");
        }

        let song_id = self.session.beatmap().song_id.clone();
        self.audio.load(&song_id)?;

        // Shutdown may have been requested while the collaborators came up.
        self.ensure_alive()?;
        self.session.mark_ready()?;
        tracing::info!(song_id, source = motion.source, "runtime initialised");
        Ok(motion)
    }

    /// Starts the countdown. Audio begins once it runs out.
    pub fn start(&mut self, wall_ms: f64) -> Result<()> {
        self.ensure_alive()?;
        self.session.start(wall_ms)
    }

    /// One host frame. Returns the performance sample when an interval
    /// boundary was crossed. The controller is sampled even while paused.
    pub fn frame(&mut self, wall_ms: f64, frame_time_ms: f64) -> Option<PerformanceSample> {
        if self.ensure_alive().is_err() {
            return None;
        }

        if self.session.state() != GameState::Paused {
            self.motion.poll(wall_ms);
        }
        self.session.frame(wall_ms);

        if self.session.state() == GameState::Playing {
            if !self.audio_started {
                self.start_audio(wall_ms);
            }
            let audio = self.audio.state(wall_ms);
            self.session.observe_audio(&audio);
        }
        if self.session.state() == GameState::Finished && self.audio_started {
            self.audio.stop();
            self.audio_started = false;
        }

        self.controller.record_frame(wall_ms, frame_time_ms)
    }

    pub fn pause(&mut self, wall_ms: f64) -> Result<()> {
        self.ensure_alive()?;
        self.session.pause(wall_ms)?;
        self.motion.pause();
        self.audio.pause(wall_ms);
        Ok(())
    }

    pub fn resume(&mut self, wall_ms: f64) -> Result<()> {
        self.ensure_alive()?;
        self.session.resume(wall_ms)?;
        self.motion.resume();
        if self.audio_started {
            self.audio.play(wall_ms)?;
        }
        Ok(())
    }

    /// Tears down every collaborator. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.liveness.kill();
        self.motion.dispose();
        self.audio.stop();
        self.audio.dispose();
        tracing::info!(state = ?self.session.state(), "runtime disposed");
    }

    fn start_audio(&mut self, wall_ms: f64) {
        match self.audio.play(wall_ms) {
            Ok(()) => {
                // Line the track up with game time, which started when the
                // countdown ran out rather than at this frame.
                let position = (self.session.game_time_ms(wall_ms) + self.audio_offset_ms).max(0.0);
                self.audio.seek(position, wall_ms);
                self.audio_started = true;
            }
            Err(err) => {
                tracing::warn!(%err, "audio playback failed, ending session");
                self.session.notify_audio_ended();
            }
        }
    }

    fn ensure_alive(&mut self) -> Result<()> {
        if !self.disposed && !self.liveness.is_alive() {
            self.dispose();
        }
        if self.disposed {
            return Err(BeatReachError::msg("runtime has been disposed"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for GameRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameRuntime")
            .field("session", &self.session)
            .field("motion", &self.motion)
            .field("controller", &self.controller)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Drop for GameRuntime {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::audio::ClockAudio;
    use crate::config::MotionConfig;
    use crate::motion::{MotionSource, MotionWriter};
    use crate::performance::DeviceTier;
    use crate::{Difficulty, Target};

    struct BrokenCamera;

    impl MotionSource for BrokenCamera {
        fn name(&self) -> &'static str {
            "camera"
        }

        fn initialize(&mut self, _writer: MotionWriter) -> Result<()> {
            Err(BeatReachError::MotionInit("no camera".into()))
        }

        fn poll(&mut self, _now_ms: f64) {}

        fn pause(&mut self) {}

        fn resume(&mut self) {}

        fn dispose(&mut self) {}

        fn is_tracking(&self) -> bool {
            false
        }
    }

    fn runtime_with(motion: MotionTracker, audio_ms: f64, targets: u64) -> GameRuntime {
        let targets = (1..=targets)
            .map(|n| Target::new(n * 1000, Vec3::ZERO))
            .collect();
        let beatmap = BeatMap::new("song", 60.0, 0, Difficulty::Normal, targets).unwrap();
        let config = AppConfig::default();
        let controller = PerformanceController::with_tier(config.performance, DeviceTier::Mid);
        GameRuntime::new(
            beatmap,
            &config,
            motion,
            Box::new(ClockAudio::new(audio_ms)),
            controller,
        )
    }

    fn runtime(audio_ms: f64, targets: u64) -> GameRuntime {
        runtime_with(MotionTracker::synthetic(MotionConfig::default()), audio_ms, targets)
    }

    #[test]
    fn runs_to_completion() {
        let mut runtime = runtime(60_000.0, 5);
        let init = runtime.initialize().unwrap();
        assert!(!init.fallback);
        assert_eq!(runtime.session().state(), GameState::Ready);

        runtime.start(0.0).unwrap();
        let mut wall = 0.0;
        while runtime.session().state() != GameState::Finished && wall < 20_000.0 {
            runtime.frame(wall, 16.0);
            wall += 16.0;
        }

        let stats = runtime.session().stats();
        assert_eq!(runtime.session().state(), GameState::Finished);
        assert_eq!(stats.perfects + stats.goods + stats.misses, 5);
    }

    #[test]
    fn motion_failure_falls_back_to_synthetic() {
        let motion = MotionTracker::new(Box::new(BrokenCamera), MotionConfig::default());
        let mut runtime = runtime_with(motion, 10_000.0, 1);

        let init = runtime.initialize().unwrap();
        assert!(init.fallback);
        assert!(matches!(init.error, Some(BeatReachError::MotionInit(_))));
        assert_eq!(runtime.motion().source_name(), "synthetic");
        assert_eq!(runtime.session().state(), GameState::Ready);
    }

    #[test]
    fn audio_end_finishes_the_session() {
        let mut runtime = runtime(500.0, 3);
        runtime.initialize().unwrap();
        runtime.start(0.0).unwrap();

        runtime.frame(3_000.0, 16.0);
        assert_eq!(runtime.session().state(), GameState::Playing);
        runtime.frame(3_600.0, 16.0);
        assert_eq!(runtime.session().state(), GameState::Finished);
        assert_eq!(runtime.session().stats().misses, 3);
    }

    #[test]
    fn pause_stops_motion_but_not_the_controller() {
        let mut runtime = runtime(60_000.0, 3);
        let reader = runtime.motion().reader();
        runtime.initialize().unwrap();
        runtime.start(0.0).unwrap();
        runtime.frame(3_000.0, 16.0);
        runtime.pause(3_000.0).unwrap();
        let published = reader.published_at_ms();

        let mut sampled = 0;
        let mut wall = 3_000.0;
        while wall < 6_000.0 {
            wall += 16.0;
            if runtime.frame(wall, 16.0).is_some() {
                sampled += 1;
            }
        }

        assert_eq!(reader.published_at_ms(), published);
        assert_eq!(runtime.session().last_game_time_ms(), 0.0);
        assert!(sampled >= 2);

        runtime.resume(wall).unwrap();
        runtime.frame(wall + 200.0, 16.0);
        assert_eq!(runtime.session().state(), GameState::Playing);
        assert_eq!(runtime.session().last_game_time_ms(), 200.0);
    }

    #[test]
    fn audio_offset_shifts_playback() {
        let mut runtime = runtime(60_000.0, 3);
        runtime.set_audio_offset(120.0);
        runtime.initialize().unwrap();
        runtime.start(0.0).unwrap();

        runtime.frame(3_050.0, 16.0);
        let audio = runtime.audio.state(3_050.0);
        assert_eq!(audio.current_time_ms, 170.0);
        assert_eq!(runtime.session().game_time_ms(3_050.0), 50.0);
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut runtime = runtime(1_000.0, 1);
        runtime.initialize().unwrap();
        runtime.dispose();
        runtime.dispose();

        assert!(runtime.is_disposed());
        assert!(runtime.start(0.0).is_err());
        assert!(runtime.frame(0.0, 16.0).is_none());
        assert!(!runtime.motion().is_tracking());
    }

    #[test]
    fn killed_liveness_disposes_on_next_call() {
        let mut runtime = runtime(1_000.0, 1);
        runtime.liveness().kill();

        assert!(runtime.initialize().is_err());
        assert!(runtime.is_disposed());
        assert_eq!(runtime.session().state(), GameState::Loading);
    }
}
