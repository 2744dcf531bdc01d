//! Core library for the Beatreach rhythm game.
//!
//! Timed targets appear in 3D space and the player hits them with a tracked
//! hand. Each module owns one subsystem: beat-map generation (procedural and
//! from audio energy), hit judgement, scoring and the session lifecycle, and
//! the adaptive performance controller. Presentation, camera tracking and
//! audio decoding sit behind the traits in [`motion`] and [`audio`].

pub mod analysis;
pub mod audio;
pub mod beatmap;
pub mod config;
pub mod error;
pub mod events;
pub mod generator;
pub mod judgement;
pub mod motion;
pub mod performance;
pub mod runtime;
pub mod scoring;
pub mod session;
pub mod store;
pub mod timeline;

pub use analysis::{EnergyAnalyzer, EnergyProfile};
pub use audio::{AudioSource, AudioState, ClockAudio};
pub use beatmap::{BeatMap, Difficulty, DifficultyPreset, Target, TargetId, TargetKind};
pub use config::AppConfig;
pub use error::{BeatReachError, Result};
pub use events::{Observers, SubscriptionId};
pub use generator::BeatMapGenerator;
pub use judgement::{Judgement, JudgementEngine};
pub use motion::{MotionReader, MotionSample, MotionSource, MotionTracker, MotionWriter};
pub use performance::{DeviceHints, DeviceTier, PerformanceConfig, PerformanceController, QualityChange};
pub use runtime::{GameRuntime, Liveness};
pub use scoring::GameStats;
pub use session::{GameSession, GameState, SessionEvent};
pub use store::{JsonFileStore, MemoryStore, ScoreRecord, ScoreStore};
pub use timeline::{GameClock, WallClock};
