//! Scoring and lifecycle state machine for one play session.
//!
//! The host calls [`GameSession::frame`] (or [`GameSession::update`] with an
//! explicit game time) once per rendered frame. Everything the presentation
//! layer needs flows out through [`SessionEvent`] observers.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::audio::AudioState;
use crate::beatmap::{BeatMap, Target, TargetId, TargetKind};
use crate::config::{JudgementConfig, SessionConfig};
use crate::events::{Observers, SubscriptionId};
use crate::judgement::{Judgement, JudgementEngine};
use crate::motion::MotionReader;
use crate::scoring::GameStats;
use crate::timeline::GameClock;
use crate::{BeatReachError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Loading,
    Ready,
    Countdown,
    Playing,
    Paused,
    Finished,
}

impl GameState {
    pub fn can_transition_to(self, next: GameState) -> bool {
        use GameState::*;
        matches!(
            (self, next),
            (Loading, Ready)
                | (Ready, Countdown)
                | (Countdown, Playing)
                | (Playing, Paused)
                | (Paused, Playing)
                | (Playing, Finished)
                | (Paused, Finished)
        )
    }
}

/// Everything a session reports to its observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: GameState,
        to: GameState,
    },
    /// A target entered its active window.
    TargetSpawned {
        id: TargetId,
        time_ms: u64,
        position: Vec3,
        kind: TargetKind,
    },
    /// A target left its active window, either resolved or discarded.
    TargetDespawned { id: TargetId },
    Judged {
        id: TargetId,
        judgement: Judgement,
        /// Target position, for hit effects.
        position: Vec3,
        hand: Option<Vec3>,
        delta_ms: f64,
        gain: u64,
    },
    StatsChanged(GameStats),
    Completed(GameStats),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    AllResolved,
    AudioEnded,
}

pub struct GameSession {
    beatmap: BeatMap,
    engine: JudgementEngine,
    config: SessionConfig,
    motion: MotionReader,
    state: GameState,
    stats: GameStats,
    clock: GameClock,
    countdown_started_ms: Option<f64>,
    resolutions: Vec<Option<Judgement>>,
    active: Vec<TargetId>,
    next_spawn: usize,
    unresolved: usize,
    last_game_time_ms: f64,
    observers: Observers<SessionEvent>,
}

impl GameSession {
    pub fn new(
        beatmap: BeatMap,
        judgement: JudgementConfig,
        config: SessionConfig,
        motion: MotionReader,
    ) -> Self {
        debug_assert!(
            beatmap
                .targets()
                .windows(2)
                .all(|pair| pair[0].time_ms < pair[1].time_ms),
            "target times must be unique and ascending"
        );

        let total = beatmap.len();
        Self {
            stats: GameStats::new(total as u32),
            resolutions: vec![None; total],
            unresolved: total,
            beatmap,
            engine: JudgementEngine::new(judgement),
            config,
            motion,
            state: GameState::Loading,
            clock: GameClock::new(),
            countdown_started_ms: None,
            active: Vec::new(),
            next_spawn: 0,
            last_game_time_ms: 0.0,
            observers: Observers::new(),
        }
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.observers.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn stats(&self) -> &GameStats {
        &self.stats
    }

    pub fn beatmap(&self) -> &BeatMap {
        &self.beatmap
    }

    /// Targets currently inside their active window and not yet resolved.
    pub fn active_targets(&self) -> impl Iterator<Item = &Target> + '_ {
        self.active.iter().filter_map(|id| self.beatmap.target(*id))
    }

    pub fn resolution(&self, id: TargetId) -> Option<Judgement> {
        self.resolutions.get(id.0 as usize).copied().flatten()
    }

    pub fn unresolved(&self) -> usize {
        self.unresolved
    }

    /// Game time that `wall_ms` maps to, honouring pauses.
    pub fn game_time_ms(&self, wall_ms: f64) -> f64 {
        self.clock.game_time_ms(wall_ms)
    }

    /// Game time of the last processed update.
    pub fn last_game_time_ms(&self) -> f64 {
        self.last_game_time_ms
    }

    pub fn countdown_remaining_ms(&self, wall_ms: f64) -> Option<f64> {
        match (self.state, self.countdown_started_ms) {
            (GameState::Countdown, Some(started)) => {
                Some((self.config.countdown_ms - (wall_ms - started)).max(0.0))
            }
            _ => None,
        }
    }

    /// Assets and the beat-map are in place.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.transition(GameState::Ready).map(|_| ())
    }

    /// Begins the countdown.
    pub fn start(&mut self, wall_ms: f64) -> Result<()> {
        if self.transition(GameState::Countdown)? {
            self.countdown_started_ms = Some(wall_ms);
        }
        Ok(())
    }

    pub fn pause(&mut self, wall_ms: f64) -> Result<()> {
        if self.transition(GameState::Paused)? {
            self.clock.pause(wall_ms);
        }
        Ok(())
    }

    pub fn resume(&mut self, wall_ms: f64) -> Result<()> {
        if self.state == GameState::Paused {
            self.clock.resume(wall_ms);
        }
        self.transition(GameState::Playing).map(|_| ())
    }

    /// Per-frame entry point driven by the host's wall clock. Finishes the
    /// countdown when it runs out and advances gameplay while playing.
    pub fn frame(&mut self, wall_ms: f64) {
        if self.state == GameState::Countdown && self.countdown_remaining_ms(wall_ms) == Some(0.0) {
            // Game time zero is the instant the countdown ran out, not the
            // (possibly late) frame that noticed it.
            let started = self.countdown_started_ms.unwrap_or(wall_ms);
            self.clock.start(started + self.config.countdown_ms);
            // Countdown -> Playing is always a legal edge.
            let _ = self.transition(GameState::Playing);
        }
        if self.state == GameState::Playing {
            let now = self.clock.game_time_ms(wall_ms);
            self.update(now);
        }
    }

    /// Advances gameplay to `game_time_ms`. Does nothing unless playing.
    pub fn update(&mut self, game_time_ms: f64) {
        if self.state != GameState::Playing {
            return;
        }
        self.last_game_time_ms = game_time_ms;

        let sample = self.motion.latest();
        for id in self.spawn_due(game_time_ms) {
            self.resolve(id, Judgement::Miss, game_time_ms, sample.position);
        }

        let trail = self.config.despawn_trail_ms;
        let targets = self.beatmap.targets();
        let outcomes: Vec<(TargetId, Judgement)> = self
            .active
            .iter()
            .filter_map(|&id| {
                let target = &targets[id.0 as usize];
                if game_time_ms > target.time_ms as f64 + trail {
                    Some((id, Judgement::Miss))
                } else if let Some(judgement) = self.engine.hit_test(game_time_ms, target, &sample) {
                    Some((id, judgement))
                } else if self.engine.has_expired(game_time_ms, target) {
                    Some((id, Judgement::Miss))
                } else {
                    None
                }
            })
            .collect();

        for (id, judgement) in outcomes {
            self.resolve(id, judgement, game_time_ms, sample.position);
        }

        if self.unresolved == 0 {
            self.finish(FinishReason::AllResolved);
        }
    }

    /// External end-of-audio signal.
    pub fn notify_audio_ended(&mut self) {
        if matches!(self.state, GameState::Playing | GameState::Paused) {
            self.finish(FinishReason::AudioEnded);
        }
    }

    /// Treats "stopped with a non-zero position" as the end of the song.
    /// Only consulted while playing, since a paused session pauses its audio.
    pub fn observe_audio(&mut self, audio: &AudioState) {
        if self.state == GameState::Playing && audio.has_ended() {
            self.finish(FinishReason::AudioEnded);
        }
    }

    /// Activates every target whose window has opened. Targets whose window
    /// already closed (after a long frame) are returned instead of spawned.
    fn spawn_due(&mut self, now: f64) -> Vec<TargetId> {
        let targets = self.beatmap.targets();
        let mut stale = Vec::new();
        while let Some(target) = targets.get(self.next_spawn) {
            if target.time_ms as f64 - self.config.spawn_lead_ms > now {
                break;
            }
            self.next_spawn += 1;
            if self.resolutions[target.id.0 as usize].is_some() {
                continue;
            }
            if now > target.time_ms as f64 + self.config.despawn_trail_ms {
                stale.push(target.id);
                continue;
            }
            self.active.push(target.id);
            tracing::debug!(id = target.id.0, time_ms = target.time_ms, "target spawned");
            self.observers.emit(&SessionEvent::TargetSpawned {
                id: target.id,
                time_ms: target.time_ms,
                position: target.position,
                kind: target.kind,
            });
        }
        stale
    }

    fn resolve(&mut self, id: TargetId, judgement: Judgement, now: f64, hand: Option<Vec3>) {
        let slot = &mut self.resolutions[id.0 as usize];
        if slot.is_some() {
            return;
        }
        *slot = Some(judgement);
        self.unresolved -= 1;
        let was_active = self.active.contains(&id);
        self.active.retain(|active| *active != id);

        let gain = self.stats.record(judgement);
        let (position, delta_ms) = match self.beatmap.target(id) {
            Some(target) => (target.position, now - target.time_ms as f64),
            None => (Vec3::ZERO, 0.0),
        };

        self.observers.emit(&SessionEvent::Judged {
            id,
            judgement,
            position,
            hand,
            delta_ms,
            gain,
        });
        if was_active {
            self.observers.emit(&SessionEvent::TargetDespawned { id });
        }
        let stats = self.stats;
        self.observers.emit(&SessionEvent::StatsChanged(stats));
    }

    fn finish(&mut self, reason: FinishReason) {
        if self.state == GameState::Finished {
            return;
        }

        let mut leftovers = 0;
        for resolution in self.resolutions.iter_mut().filter(|r| r.is_none()) {
            *resolution = Some(Judgement::Miss);
            leftovers += 1;
        }
        for id in std::mem::take(&mut self.active) {
            self.observers.emit(&SessionEvent::TargetDespawned { id });
        }
        self.next_spawn = self.beatmap.len();
        self.unresolved = 0;

        if leftovers > 0 {
            self.stats.record_misses(leftovers);
            let stats = self.stats;
            self.observers.emit(&SessionEvent::StatsChanged(stats));
        }

        if self.transition(GameState::Finished).is_ok() {
            tracing::info!(
                ?reason,
                score = self.stats.score,
                accuracy = self.stats.accuracy,
                max_combo = self.stats.max_combo,
                "session finished"
            );
            let stats = self.stats;
            self.observers.emit(&SessionEvent::Completed(stats));
        }
    }

    /// Moves to `next`. Returns `Ok(false)` for a same-state no-op.
    fn transition(&mut self, next: GameState) -> Result<bool> {
        if self.state == next {
            return Ok(false);
        }
        if !self.state.can_transition_to(next) {
            return Err(BeatReachError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let from = std::mem::replace(&mut self.state, next);
        tracing::info!(?from, to = ?next, "session state changed");
        self.observers
            .emit(&SessionEvent::StateChanged { from, to: next });
        Ok(true)
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("song_id", &self.beatmap.song_id)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("active", &self.active.len())
            .field("unresolved", &self.unresolved)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::motion::{motion_slot, MotionUpdate, MotionWriter};
    use crate::Difficulty;

    struct Harness {
        session: GameSession,
        hand: MotionWriter,
        events: Arc<Mutex<Vec<SessionEvent>>>,
        publish_at: f64,
    }

    impl Harness {
        /// One target per second starting at 1000 ms, all at the origin.
        fn new(count: u64) -> Self {
            Self::with_judgement(count, JudgementConfig::default())
        }

        fn with_judgement(count: u64, judgement: JudgementConfig) -> Self {
            let targets = (1..=count)
                .map(|n| Target::new(n * 1000, Vec3::ZERO))
                .collect();
            let beatmap = BeatMap::new("test", 60.0, 0, Difficulty::Normal, targets).unwrap();
            let (hand, reader) = motion_slot();
            let mut session = GameSession::new(
                beatmap,
                judgement,
                SessionConfig {
                    countdown_ms: 3000.0,
                    ..Default::default()
                },
                reader,
            );

            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            session.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

            Self {
                session,
                hand,
                events,
                publish_at: 0.0,
            }
        }

        fn playing(count: u64) -> Self {
            let mut harness = Self::new(count);
            harness.session.mark_ready().unwrap();
            harness.session.start(0.0).unwrap();
            harness.session.frame(3000.0);
            assert_eq!(harness.session.state(), GameState::Playing);
            harness
        }

        fn hand_at(&mut self, position: Option<Vec3>) {
            self.publish_at += 1.0;
            self.hand.publish(
                self.publish_at,
                &MotionUpdate {
                    position,
                    confidence: 1.0,
                    ..Default::default()
                },
            );
        }

        fn judgements(&self) -> Vec<(TargetId, Judgement)> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|event| match event {
                    SessionEvent::Judged { id, judgement, .. } => Some((*id, *judgement)),
                    _ => None,
                })
                .collect()
        }

        fn count(&self, predicate: impl Fn(&SessionEvent) -> bool) -> usize {
            self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
        }
    }

    #[test]
    fn lifecycle_transitions_fire_once() {
        let mut harness = Harness::new(1);
        let session = &mut harness.session;

        assert_eq!(session.state(), GameState::Loading);
        assert!(matches!(
            session.start(0.0),
            Err(BeatReachError::InvalidTransition { .. })
        ));
        session.mark_ready().unwrap();
        session.mark_ready().unwrap();
        session.start(0.0).unwrap();
        assert_eq!(session.countdown_remaining_ms(1000.0), Some(2000.0));

        session.frame(2999.0);
        assert_eq!(session.state(), GameState::Countdown);
        session.frame(3000.0);
        assert_eq!(session.state(), GameState::Playing);
        assert_eq!(session.game_time_ms(3000.0), 0.0);

        let changes = harness.count(|e| matches!(e, SessionEvent::StateChanged { .. }));
        assert_eq!(changes, 3);
    }

    #[test]
    fn resolves_perfect_and_good_hits() {
        let mut harness = Harness::playing(2);

        harness.hand_at(Some(Vec3::new(0.1, 0.0, 0.0)));
        harness.session.update(1020.0);
        harness.hand_at(Some(Vec3::new(0.5, 0.0, 0.0)));
        harness.session.update(2000.0);

        assert_eq!(
            harness.judgements(),
            vec![(TargetId(0), Judgement::Perfect), (TargetId(1), Judgement::Good)]
        );
        let stats = harness.session.stats();
        assert_eq!(stats.score, 150);
        assert_eq!(stats.combo, 2);
        assert_eq!(stats.accuracy, 80.0);
        assert_eq!(harness.session.state(), GameState::Finished);
    }

    #[test]
    fn first_touch_wins_over_a_better_later_frame() {
        let mut harness = Harness::playing(1);

        harness.hand_at(Some(Vec3::new(0.5, 0.0, 0.0)));
        harness.session.update(920.0);
        harness.hand_at(Some(Vec3::ZERO));
        harness.session.update(1000.0);

        assert_eq!(harness.judgements(), vec![(TargetId(0), Judgement::Good)]);
    }

    #[test]
    fn absent_hand_times_out_to_miss() {
        let mut harness = Harness::playing(3);

        harness.hand_at(Some(Vec3::ZERO));
        harness.session.update(1000.0);
        harness.hand_at(None);
        harness.session.update(2050.0);
        assert_eq!(harness.judgements().len(), 1);
        harness.session.update(2100.0);
        assert_eq!(harness.judgements().len(), 1);
        harness.session.update(2101.0);

        assert_eq!(harness.judgements()[1], (TargetId(1), Judgement::Miss));
        assert_eq!(harness.session.stats().combo, 0);
        assert_eq!(harness.session.stats().max_combo, 1);
    }

    #[test]
    fn far_hand_inside_window_leaves_target_open() {
        let mut harness = Harness::playing(1);
        harness.hand_at(Some(Vec3::new(0.9, 0.0, 0.0)));
        harness.session.update(1000.0);

        assert!(harness.judgements().is_empty());
        assert_eq!(harness.session.active_targets().count(), 1);
    }

    #[test]
    fn every_target_resolves_exactly_once() {
        let mut harness = Harness::playing(10);
        harness.hand_at(Some(Vec3::ZERO));

        let mut t = 0.0;
        while harness.session.state() == GameState::Playing {
            harness.session.update(t);
            t += 16.0;
        }

        let judgements = harness.judgements();
        assert_eq!(judgements.len(), 10);
        let mut ids: Vec<TargetId> = judgements.iter().map(|(id, _)| *id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 10);

        let spawned = harness.count(|e| matches!(e, SessionEvent::TargetSpawned { .. }));
        let despawned = harness.count(|e| matches!(e, SessionEvent::TargetDespawned { .. }));
        assert_eq!(spawned, 10);
        assert_eq!(despawned, 10);
        assert_eq!(harness.count(|e| matches!(e, SessionEvent::Completed(_))), 1);
    }

    #[test]
    fn spawn_window_opens_one_second_early() {
        let mut harness = Harness::playing(2);
        harness.session.update(0.0);
        assert_eq!(harness.session.active_targets().count(), 1);
        harness.session.update(999.0);
        assert_eq!(harness.session.active_targets().count(), 1);
        harness.session.update(1000.0);
        assert_eq!(harness.session.active_targets().count(), 2);
    }

    #[test]
    fn targets_retire_when_the_trail_ends() {
        let mut harness = Harness::with_judgement(
            2,
            JudgementConfig {
                good_window_ms: 800.0,
                ..Default::default()
            },
        );
        harness.session.mark_ready().unwrap();
        harness.session.start(0.0).unwrap();
        harness.session.frame(3000.0);

        harness.session.update(1000.0);
        assert_eq!(harness.session.active_targets().count(), 2);

        harness.session.update(1700.0);
        let active: Vec<TargetId> = harness.session.active_targets().map(|t| t.id).collect();
        assert_eq!(active, vec![TargetId(1)]);
        assert_eq!(harness.judgements(), vec![(TargetId(0), Judgement::Miss)]);
        assert_eq!(
            harness.count(|e| matches!(e, SessionEvent::TargetDespawned { id } if *id == TargetId(0))),
            1
        );
    }

    #[test]
    fn hitch_past_a_window_skips_the_spawn() {
        let mut harness = Harness::playing(2);
        assert_eq!(harness.session.active_targets().count(), 1);

        harness.session.update(2600.0);

        assert_eq!(
            harness.judgements(),
            vec![(TargetId(1), Judgement::Miss), (TargetId(0), Judgement::Miss)]
        );
        assert_eq!(harness.count(|e| matches!(e, SessionEvent::TargetSpawned { .. })), 1);
        assert_eq!(harness.count(|e| matches!(e, SessionEvent::TargetDespawned { .. })), 1);
        assert_eq!(harness.session.state(), GameState::Finished);
    }

    #[test]
    fn score_never_decreases_and_misses_add_nothing() {
        let mut harness = Harness::playing(12);
        let mut last_score = 0;

        for n in 1..=12u64 {
            let hit = n % 4 != 0;
            harness.hand_at(hit.then_some(Vec3::ZERO));
            let time = (n * 1000) as f64;
            harness.session.update(time);
            harness.session.update(time + 101.0);
            let score = harness.session.stats().score;
            assert!(score >= last_score);
            if !hit {
                assert_eq!(score, last_score);
                assert_eq!(harness.session.stats().combo, 0);
            }
            last_score = score;
        }
    }

    #[test]
    fn half_perfect_half_missed_is_fifty_percent() {
        let mut harness = Harness::playing(10);
        harness.hand_at(Some(Vec3::ZERO));
        for n in 1..=5u64 {
            harness.session.update((n * 1000) as f64);
        }
        harness.hand_at(None);
        harness.session.notify_audio_ended();

        let stats = *harness.session.stats();
        assert_eq!(stats.perfects, 5);
        assert_eq!(stats.misses, 5);
        assert_eq!(stats.accuracy, 50.0);
        assert_eq!(stats.perfects + stats.goods + stats.misses, stats.total_notes);
        assert_eq!(harness.session.state(), GameState::Finished);

        let completed = harness
            .events
            .lock()
            .unwrap()
            .iter()
            .find_map(|e| match e {
                SessionEvent::Completed(stats) => Some(*stats),
                _ => None,
            })
            .unwrap();
        assert_eq!(completed, stats);
    }

    #[test]
    fn stopped_audio_ends_the_session() {
        let mut harness = Harness::playing(3);
        harness.session.observe_audio(&AudioState {
            is_playing: true,
            current_time_ms: 500.0,
            duration_ms: None,
        });
        assert_eq!(harness.session.state(), GameState::Playing);

        harness.session.observe_audio(&AudioState {
            is_playing: false,
            current_time_ms: 1500.0,
            duration_ms: None,
        });
        assert_eq!(harness.session.state(), GameState::Finished);
        assert_eq!(harness.session.stats().misses, 3);
    }

    #[test]
    fn pause_freezes_game_time_and_judging() {
        let mut harness = Harness::playing(1);
        harness.hand_at(Some(Vec3::ZERO));

        harness.session.frame(3500.0);
        harness.session.pause(3500.0).unwrap();
        assert_eq!(harness.session.game_time_ms(9000.0), 500.0);

        harness.session.frame(9000.0);
        assert!(harness.judgements().is_empty());
        assert_eq!(harness.session.last_game_time_ms(), 500.0);

        harness.session.resume(60_000.0).unwrap();
        assert_eq!(harness.session.game_time_ms(60_000.0), 500.0);
        harness.session.frame(60_500.0);
        assert_eq!(harness.judgements(), vec![(TargetId(0), Judgement::Perfect)]);
    }

    #[test]
    fn finished_is_terminal() {
        let mut harness = Harness::playing(1);
        harness.session.notify_audio_ended();
        harness.session.notify_audio_ended();

        assert!(harness.session.resume(0.0).is_err());
        assert!(harness.session.pause(0.0).is_err());
        assert_eq!(harness.count(|e| matches!(e, SessionEvent::Completed(_))), 1);
    }

    #[test]
    fn empty_map_finishes_on_first_update() {
        let mut harness = Harness::new(0);
        harness.session.mark_ready().unwrap();
        harness.session.start(0.0).unwrap();
        harness.session.frame(3000.0);
        assert_eq!(harness.session.state(), GameState::Finished);
        assert_eq!(harness.session.stats().accuracy, 0.0);
    }
}
