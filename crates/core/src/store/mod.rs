use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{Difficulty, GameStats, Result};

/// One finished play, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub song_id: String,
    pub difficulty: Difficulty,
    pub player: String,
    pub score: u64,
    pub accuracy: f64,
    pub max_combo: u32,
    pub perfects: u32,
    pub goods: u32,
    pub misses: u32,
    /// Seconds since the Unix epoch.
    pub played_at: u64,
}

impl ScoreRecord {
    pub fn from_stats(
        song_id: impl Into<String>,
        difficulty: Difficulty,
        player: impl Into<String>,
        stats: &GameStats,
    ) -> Self {
        Self {
            song_id: song_id.into(),
            difficulty,
            player: player.into(),
            score: stats.score,
            accuracy: stats.accuracy,
            max_combo: stats.max_combo,
            perfects: stats.perfects,
            goods: stats.goods,
            misses: stats.misses,
            played_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default(),
        }
    }
}

/// Player preferences that survive between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    pub player: String,
    pub difficulty: Difficulty,
    pub music_volume: f32,
    pub effects_volume: f32,
    /// Latency calibration in milliseconds, handed to
    /// [`GameRuntime::set_audio_offset`](crate::GameRuntime::set_audio_offset).
    pub audio_offset_ms: f64,
    pub target_fps: f64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            player: "player".to_string(),
            difficulty: Difficulty::Normal,
            music_volume: 0.8,
            effects_volume: 0.8,
            audio_offset_ms: 0.0,
            target_fps: 60.0,
        }
    }
}

/// Persistence collaborator. Writes are last-write-wins per record.
pub trait ScoreStore {
    fn save_score(&mut self, record: ScoreRecord) -> Result<()>;

    /// Best scores first.
    fn leaderboard(&self, song_id: &str, difficulty: Difficulty, limit: usize) -> Result<Vec<ScoreRecord>>;

    fn settings(&self) -> Result<PlayerSettings>;

    fn save_settings(&mut self, settings: &PlayerSettings) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreData {
    scores: Vec<ScoreRecord>,
    settings: Option<PlayerSettings>,
}

impl StoreData {
    fn leaderboard(&self, song_id: &str, difficulty: Difficulty, limit: usize) -> Vec<ScoreRecord> {
        let mut entries: Vec<ScoreRecord> = self
            .scores
            .iter()
            .filter(|record| record.song_id == song_id && record.difficulty == difficulty)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.accuracy.total_cmp(&a.accuracy))
                .then(a.played_at.cmp(&b.played_at))
        });
        entries.truncate(limit);
        entries
    }
}

/// In-memory store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: StoreData,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScoreStore for MemoryStore {
    fn save_score(&mut self, record: ScoreRecord) -> Result<()> {
        self.data.scores.push(record);
        Ok(())
    }

    fn leaderboard(&self, song_id: &str, difficulty: Difficulty, limit: usize) -> Result<Vec<ScoreRecord>> {
        Ok(self.data.leaderboard(song_id, difficulty, limit))
    }

    fn settings(&self) -> Result<PlayerSettings> {
        Ok(self.data.settings.clone().unwrap_or_default())
    }

    fn save_settings(&mut self, settings: &PlayerSettings) -> Result<()> {
        self.data.settings = Some(settings.clone());
        Ok(())
    }
}

/// Single JSON document on disk, rewritten on every save.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: StoreData,
}

impl JsonFileStore {
    /// Opens the store, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.data)?;
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, raw)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl ScoreStore for JsonFileStore {
    fn save_score(&mut self, record: ScoreRecord) -> Result<()> {
        self.data.scores.push(record);
        self.flush()
    }

    fn leaderboard(&self, song_id: &str, difficulty: Difficulty, limit: usize) -> Result<Vec<ScoreRecord>> {
        Ok(self.data.leaderboard(song_id, difficulty, limit))
    }

    fn settings(&self) -> Result<PlayerSettings> {
        Ok(self.data.settings.clone().unwrap_or_default())
    }

    fn save_settings(&mut self, settings: &PlayerSettings) -> Result<()> {
        self.data.settings = Some(settings.clone());
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(song: &str, difficulty: Difficulty, score: u64) -> ScoreRecord {
        ScoreRecord {
            song_id: song.to_string(),
            difficulty,
            player: "p1".to_string(),
            score,
            accuracy: 90.0,
            max_combo: 10,
            perfects: 8,
            goods: 2,
            misses: 0,
            played_at: score,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("beatreach-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn leaderboard_filters_sorts_and_limits() {
        let mut store = MemoryStore::new();
        for score in [300, 900, 100, 600] {
            store.save_score(record("a", Difficulty::Hard, score)).unwrap();
        }
        store.save_score(record("a", Difficulty::Easy, 5_000)).unwrap();
        store.save_score(record("b", Difficulty::Hard, 5_000)).unwrap();

        let board = store.leaderboard("a", Difficulty::Hard, 3).unwrap();
        let scores: Vec<u64> = board.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![900, 600, 300]);
    }

    #[test]
    fn record_copies_stats() {
        let stats = GameStats {
            score: 1234,
            max_combo: 12,
            perfects: 10,
            goods: 2,
            misses: 1,
            accuracy: 87.0,
            ..GameStats::new(13)
        };
        let record = ScoreRecord::from_stats("song", Difficulty::Normal, "p1", &stats);
        assert_eq!(record.score, 1234);
        assert_eq!(record.max_combo, 12);
        assert_eq!(record.accuracy, 87.0);
    }

    #[test]
    fn json_store_persists_across_reopen() {
        let path = temp_path("persist");
        let _ = std::fs::remove_file(&path);

        {
            let mut store = JsonFileStore::open(&path).unwrap();
            assert_eq!(store.settings().unwrap(), PlayerSettings::default());
            store.save_score(record("song", Difficulty::Normal, 700)).unwrap();
            store
                .save_settings(&PlayerSettings {
                    music_volume: 0.3,
                    ..Default::default()
                })
                .unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.leaderboard("song", Difficulty::Normal, 10).unwrap().len(), 1);
        assert_eq!(store.settings().unwrap().music_volume, 0.3);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
