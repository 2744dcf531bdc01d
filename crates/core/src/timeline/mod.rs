use std::time::Instant;

/// Maps host wall-clock milliseconds onto song-relative game time.
///
/// Pausing freezes game time; resuming moves the origin forward by the time
/// spent paused so the game clock continues exactly where it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GameClock {
    origin_ms: Option<f64>,
    paused_at_ms: Option<f64>,
}

impl GameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the clock so that game time equals `game_time_ms` at
    /// `wall_ms`.
    pub fn start_at(&mut self, wall_ms: f64, game_time_ms: f64) {
        self.origin_ms = Some(wall_ms - game_time_ms);
        self.paused_at_ms = None;
    }

    pub fn start(&mut self, wall_ms: f64) {
        self.start_at(wall_ms, 0.0);
    }

    pub fn is_running(&self) -> bool {
        self.origin_ms.is_some() && self.paused_at_ms.is_none()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at_ms.is_some()
    }

    pub fn pause(&mut self, wall_ms: f64) {
        if self.origin_ms.is_some() && self.paused_at_ms.is_none() {
            self.paused_at_ms = Some(wall_ms);
        }
    }

    pub fn resume(&mut self, wall_ms: f64) {
        if let (Some(origin), Some(paused_at)) = (self.origin_ms, self.paused_at_ms.take()) {
            self.origin_ms = Some(origin + (wall_ms - paused_at));
        }
    }

    /// Game time at `wall_ms`. Zero before the clock starts; frozen while
    /// paused.
    pub fn game_time_ms(&self, wall_ms: f64) -> f64 {
        match (self.origin_ms, self.paused_at_ms) {
            (None, _) => 0.0,
            (Some(origin), Some(paused_at)) => paused_at - origin,
            (Some(origin), None) => wall_ms - origin,
        }
    }
}

/// Monotonic wall clock in milliseconds, anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    anchor: Instant,
}

impl WallClock {
    pub fn start() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> f64 {
        self.anchor.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::start()
    }
}
