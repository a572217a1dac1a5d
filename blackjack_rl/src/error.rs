use thiserror::Error;

use crate::simulation::EpisodePhase;

#[derive(Error, Debug)]
pub enum BlackjackError {
    /// An environment method was called in a phase that does not allow it,
    /// e.g. stepping an episode that already ended.
    #[error("{operation} is not allowed in the {phase:?} phase")]
    IllegalAction {
        operation: &'static str,
        phase: EpisodePhase,
    },

    #[error("shoe exhausted after dealing {dealt} cards without a reshuffle")]
    ShoeExhausted { dealt: usize },

    #[error("corrupt value table: {0}")]
    CorruptState(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlackjackError>;
