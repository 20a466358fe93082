//! Wire protocol between browser clients and the server.
//!
//! Every frame is an envelope `{"a": <action>, "p": <payload>}`. The binary
//! variant carries the same JSON payload bytes followed by a single action
//! byte.
//!
//! | Code | Action           | Direction | Payload                          |
//! |------|------------------|-----------|----------------------------------|
//! | 0    | `Ping`           | S → C     | last round trip in milliseconds  |
//! | 1    | `Pong`           | C → S     | none                             |
//! | 2    | `MakeMove`       | C → S     | `{to, from, type}`               |
//! | 3    | `ClientsCounter` | S → C     | number of waiting players        |
//! | 4    | `Redirect`       | S → C     | room id                          |
//! | 5    | `RoomInfo`       | S → C     | `{w, b, t, v}`                   |
//! | 6    | `GameState`      | S → C     | `{cm, lm, w, b, r, x}`           |
//! | 7    | `Error`          | S → C     | message string                   |
//!
//! Outbound payloads are serialized once into an [`Encoded`] frame and
//! shared by every recipient of a broadcast.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ProtocolError;
use crate::game::GameSnapshot;
use crate::types::*;

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Action {
    Ping = 0,
    Pong = 1,
    MakeMove = 2,
    ClientsCounter = 3,
    Redirect = 4,
    RoomInfo = 5,
    GameState = 6,
    Error = 7,
}

impl From<Action> for u8 {
    fn from(action: Action) -> u8 {
        action as u8
    }
}

impl TryFrom<u8> for Action {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Action, ProtocolError> {
        Ok(match code {
            0 => Action::Ping,
            1 => Action::Pong,
            2 => Action::MakeMove,
            3 => Action::ClientsCounter,
            4 => Action::Redirect,
            5 => Action::RoomInfo,
            6 => Action::GameState,
            7 => Action::Error,
            other => return Err(ProtocolError::UnknownAction(other)),
        })
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope {
    a: u8,
    #[serde(default)]
    p: serde_json::Value,
}

/// `MakeMove` payload as sent by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePayload {
    pub to: u8,
    pub from: u8,
    #[serde(rename = "type")]
    pub kind: u8,
}

impl TryFrom<MovePayload> for Move {
    type Error = ProtocolError;

    fn try_from(p: MovePayload) -> Result<Move, ProtocolError> {
        let bad = || ProtocolError::BadMove {
            from: p.from,
            to: p.to,
            kind: p.kind,
        };
        let from = Square::from_index(p.from).ok_or_else(bad)?;
        let to = Square::from_index(p.to).ok_or_else(bad)?;
        let kind = MoveKind::from_bits(p.kind).ok_or_else(bad)?;
        Ok(Move::new(from, to, kind))
    }
}

impl From<Move> for MovePayload {
    fn from(mv: Move) -> Self {
        Self {
            to: mv.to().0,
            from: mv.from().0,
            kind: mv.kind() as u8,
        }
    }
}

/// A decoded client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    Pong,
    MakeMove(Move),
}

fn decode_envelope(action: u8, payload: serde_json::Value) -> Result<ClientMessage, ProtocolError> {
    match Action::try_from(action)? {
        Action::Pong => Ok(ClientMessage::Pong),
        Action::MakeMove => {
            let payload: MovePayload = serde_json::from_value(payload)?;
            Ok(ClientMessage::MakeMove(Move::try_from(payload)?))
        }
        _ => Err(ProtocolError::UnknownAction(action)),
    }
}

/// Decodes a text frame.
pub fn decode_text(text: &str) -> Result<ClientMessage, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    decode_envelope(envelope.a, envelope.p)
}

/// Decodes a binary frame: JSON payload bytes, then one action byte.
pub fn decode_binary(bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let (&action, payload) = bytes.split_last().ok_or(ProtocolError::EmptyFrame)?;
    let payload = if payload.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(payload)?
    };
    decode_envelope(action, payload)
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// A completed move as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMove {
    pub s: String,
    pub m: u16,
}

/// Room membership summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    /// White player id.
    pub w: String,
    /// Black player id.
    pub b: String,
    /// Seconds left before an empty room closes.
    pub t: u32,
    /// Spectator count.
    pub v: u32,
}

/// Full game state pushed after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub cm: Vec<WireMove>,
    pub lm: Vec<u16>,
    pub w: u32,
    pub b: u32,
    /// Result code, 0 while the game runs.
    pub r: u8,
    /// Winner code: 0 none, 1 white, 2 black.
    pub x: u8,
}

impl From<&GameSnapshot> for GameState {
    fn from(snapshot: &GameSnapshot) -> Self {
        Self {
            cm: snapshot
                .moves
                .iter()
                .map(|c| WireMove {
                    s: c.san.clone(),
                    m: c.mv.raw(),
                })
                .collect(),
            lm: compact_legal_moves(&snapshot.legal_moves),
            w: snapshot.white_time,
            b: snapshot.black_time,
            r: snapshot.result.code(),
            x: snapshot.winner.code(),
        }
    }
}

/// Raw legal moves with promotions collapsed to their queen variant.
/// Clients pick the promotion piece themselves and the engine accepts any
/// of the four on the same squares.
pub fn compact_legal_moves(legal: &[Move]) -> Vec<u16> {
    legal
        .iter()
        .filter(|mv| {
            mv.kind()
                .promotion_piece()
                .is_none_or(|piece| piece == PieceKind::Queen)
        })
        .map(|mv| mv.raw())
        .collect()
}

// ---------------------------------------------------------------------------
// Encoded frames
// ---------------------------------------------------------------------------

/// A server frame serialized once and cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub action: Action,
    pub payload: Arc<str>,
}

impl Encoded {
    pub fn new<T: Serialize + ?Sized>(action: Action, payload: &T) -> Self {
        let payload = serde_json::to_string(payload).unwrap_or_else(|e| {
            log::error!("cannot encode {:?} payload: {}", action, e);
            "null".to_string()
        });
        Self {
            action,
            payload: payload.into(),
        }
    }

    pub fn ping(rtt_ms: u64) -> Self {
        Self::new(Action::Ping, &rtt_ms)
    }

    pub fn clients_counter(count: usize) -> Self {
        Self::new(Action::ClientsCounter, &count)
    }

    pub fn redirect(room_id: &str) -> Self {
        Self::new(Action::Redirect, room_id)
    }

    pub fn room_info(info: &RoomInfo) -> Self {
        Self::new(Action::RoomInfo, info)
    }

    pub fn game_state(state: &GameState) -> Self {
        Self::new(Action::GameState, state)
    }

    pub fn error(message: &str) -> Self {
        Self::new(Action::Error, message)
    }

    pub fn to_text(&self) -> String {
        format!("{{\"a\":{},\"p\":{}}}", self.action as u8, self.payload)
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 1);
        out.extend_from_slice(self.payload.as_bytes());
        out.push(self.action as u8);
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
