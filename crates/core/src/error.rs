use crate::session::GameState;

/// Result alias that carries the custom [`BeatReachError`] type.
pub type Result<T> = std::result::Result<T, BeatReachError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BeatReachError {
    /// Free-form failure raised at an I/O or collaborator boundary.
    #[error("{0}")]
    Message(String),
    /// A caller supplied arguments outside the accepted domain.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A beat-map failed validation while being constructed.
    #[error("invalid beat-map: {0}")]
    InvalidBeatMap(String),
    /// Two targets of one map share a timestamp.
    #[error("duplicate target time {0} ms")]
    DuplicateTargetTime(u64),
    /// The lifecycle state machine refused a transition.
    #[error("cannot transition from {from:?} to {to:?}")]
    InvalidTransition { from: GameState, to: GameState },
    /// Audio energy analysis could not produce peaks. Recoverable: the
    /// caller keeps whatever beat-map it already has.
    #[error("audio analysis failed: {0}")]
    Analysis(String),
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
    /// Hand tracking could not be started.
    #[error("motion source failed to initialize: {0}")]
    MotionInit(String),
    #[error("audio source error: {0}")]
    Audio(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl BeatReachError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for BeatReachError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatReachError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
