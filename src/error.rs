//! Error types for the rules engine, the wire codec, persistence and the hub.
//!
//! Recoverable domain errors travel back to the caller on the response
//! path of whichever actor produced them; transport errors close the
//! offending connection.

use thiserror::Error;

/// Why a submitted move was not applied.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveError {
    /// The move is not in the legal-move set of the current position.
    #[error("illegal move")]
    IllegalMove,

    /// The sender does not own the side to move.
    #[error("not your turn")]
    NotYourTurn,

    /// The game already has a result.
    #[error("game is over")]
    GameOver,
}

/// Malformed FEN input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FenError {
    #[error("empty FEN string")]
    Empty,

    #[error("piece placement has {0} ranks, expected 8")]
    RankCount(usize),

    #[error("rank {rank} describes {files} files, expected 8")]
    RankWidth { rank: usize, files: usize },

    #[error("unknown piece letter '{0}'")]
    PieceLetter(char),
}

/// Result type alias for FEN parsing.
pub type FenResult<T> = Result<T, FenError>;

/// Malformed client frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown action code {0}")]
    UnknownAction(u8),

    #[error("empty binary frame")]
    EmptyFrame,

    #[error("bad move payload: from {from}, to {to}, type {kind}")]
    BadMove { from: u8, to: u8, kind: u8 },

    #[error("invalid move encoding {0:#06x}")]
    BadEncoding(u16),
}

/// Failures of the external store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt game record: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the hub while routing connections or creating rooms.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("unknown or expired session token")]
    Unauthorized,

    #[error("player {0} is already connected")]
    Conflict(String),

    #[error("cannot persist game: {0}")]
    Persistence(#[from] StoreError),
}

impl HubError {
    /// WebSocket close code sent when a connection is refused for this reason.
    pub fn close_code(&self) -> u16 {
        match self {
            HubError::RoomNotFound(_) => 4004,
            HubError::Unauthorized => 4001,
            HubError::Conflict(_) => 4009,
            HubError::Persistence(_) => 1011,
        }
    }
}
