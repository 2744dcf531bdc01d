use serde::{Deserialize, Serialize};

use crate::{BeatReachError, Result};

/// Snapshot of the playback position reported by an [`AudioSource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioState {
    pub is_playing: bool,
    pub current_time_ms: f64,
    pub duration_ms: Option<f64>,
}

impl AudioState {
    /// Stopped somewhere past the start: the song is over.
    pub fn has_ended(&self) -> bool {
        !self.is_playing && self.current_time_ms > 0.0
    }
}

/// Playback contract the game drives. Decoding and output live behind it.
pub trait AudioSource: Send {
    fn load(&mut self, song_id: &str) -> Result<()>;

    fn play(&mut self, wall_ms: f64) -> Result<()>;

    fn pause(&mut self, wall_ms: f64);

    fn stop(&mut self);

    fn seek(&mut self, position_ms: f64, wall_ms: f64);

    fn state(&mut self, wall_ms: f64) -> AudioState;

    /// Releases the output. Safe to call repeatedly.
    fn dispose(&mut self);
}

/// Silent playback that follows the host's wall clock and stops by itself
/// at the end of the track. Stands in for a real output device in headless
/// runs and tests.
#[derive(Debug, Clone, Default)]
pub struct ClockAudio {
    duration_ms: f64,
    loaded: Option<String>,
    position_ms: f64,
    playing_since_ms: Option<f64>,
    disposed: bool,
}

impl ClockAudio {
    pub fn new(duration_ms: f64) -> Self {
        Self {
            duration_ms,
            ..Default::default()
        }
    }

    pub fn loaded_song(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    fn position_at(&self, wall_ms: f64) -> f64 {
        let position = match self.playing_since_ms {
            Some(since) => self.position_ms + (wall_ms - since).max(0.0),
            None => self.position_ms,
        };
        position.min(self.duration_ms)
    }
}

impl AudioSource for ClockAudio {
    fn load(&mut self, song_id: &str) -> Result<()> {
        if self.disposed {
            return Err(BeatReachError::Audio("audio source has been disposed".into()));
        }
        if song_id.is_empty() {
            return Err(BeatReachError::Audio("empty song id".into()));
        }
        self.loaded = Some(song_id.to_string());
        self.position_ms = 0.0;
        self.playing_since_ms = None;
        Ok(())
    }

    fn play(&mut self, wall_ms: f64) -> Result<()> {
        if self.loaded.is_none() || self.disposed {
            return Err(BeatReachError::Audio("no track loaded".into()));
        }
        if self.playing_since_ms.is_none() {
            self.playing_since_ms = Some(wall_ms);
        }
        Ok(())
    }

    fn pause(&mut self, wall_ms: f64) {
        self.position_ms = self.position_at(wall_ms);
        self.playing_since_ms = None;
    }

    fn stop(&mut self) {
        self.position_ms = 0.0;
        self.playing_since_ms = None;
    }

    fn seek(&mut self, position_ms: f64, wall_ms: f64) {
        self.position_ms = position_ms.clamp(0.0, self.duration_ms);
        if self.playing_since_ms.is_some() {
            self.playing_since_ms = Some(wall_ms);
        }
    }

    fn state(&mut self, wall_ms: f64) -> AudioState {
        let current_time_ms = self.position_at(wall_ms);
        if self.playing_since_ms.is_some() && current_time_ms >= self.duration_ms {
            self.position_ms = current_time_ms;
            self.playing_since_ms = None;
        }
        AudioState {
            is_playing: self.playing_since_ms.is_some(),
            current_time_ms,
            duration_ms: Some(self.duration_ms),
        }
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.loaded = None;
        self.playing_since_ms = None;
    }
}
