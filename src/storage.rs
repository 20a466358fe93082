//! Game persistence and session lookup.
//!
//! # Storage Strategy
//!
//! The server only talks to persistence through the [`Store`] trait. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`]: maps behind `RwLock`s, used by tests and when no data
//!   directory is configured.
//! - [`FileStore`]: running games are written uncompressed to
//!   `active/<id>.rkry` after every update; finished games are compressed
//!   with zstd level 19 into `archive/<id>.rkry.zst` and the active file is
//!   removed.
//!
//! # Binary Format (`.rkry`)
//!
//! ```text
//! Size   Field
//! ────   ─────
//! 4      Magic bytes: "RKRY"
//! 1      Format version (currently 1)
//! 1      Result code
//! 1      Winner code
//! 4      Time control seconds (big-endian u32)
//! 4      Time bonus seconds (big-endian u32)
//! 8      Created at, unix seconds (big-endian u64)
//! 8      Finished at, 0 while running (big-endian u64)
//! 1+n    Game id (length-prefixed UTF-8)
//! 1+n    White player id
//! 1+n    Black player id
//! 2      Move count (big-endian u16)
//! 4×N    Compressed moves (little-endian u32 each)
//! ```
//!
//! A compressed move keeps the 16-bit move encoding in the low half and
//! the mover's remaining clock seconds in the high half. SAN and FEN are
//! not stored; [`GameRecord::replay`] rebuilds them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{StoreError, StoreResult};
use crate::game::{Game, GameSnapshot};
use crate::types::*;

/// Magic bytes identifying a game record file.
const MAGIC: &[u8; 4] = b"RKRY";

/// Current binary format version.
const FORMAT_VERSION: u8 = 1;

/// zstd compression level (19 = near-maximum compression for small data).
const ZSTD_COMPRESSION_LEVEL: i32 = 19;

// ---------------------------------------------------------------------------
// Compressed moves (4 bytes per move)
// ---------------------------------------------------------------------------

/// Packs a move and the mover's remaining seconds into 32 bits.
pub fn compress_move(mv: Move, time_left: u32) -> u32 {
    (time_left.min(u16::MAX as u32) << 16) | mv.raw() as u32
}

/// Splits a compressed move. `None` if the move kind is invalid.
pub fn decompress_move(packed: u32) -> Option<(Move, u32)> {
    Move::from_raw((packed & 0xFFFF) as u16).map(|mv| (mv, packed >> 16))
}

// ---------------------------------------------------------------------------
// GameRecord
// ---------------------------------------------------------------------------

/// A persisted game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub white_id: String,
    pub black_id: String,
    pub time_control: u32,
    pub time_bonus: u32,
    pub result: GameResult,
    pub winner: Winner,
    pub moves: Vec<u32>,
    pub created_at: u64,
    pub finished_at: u64,
}

impl GameRecord {
    /// A fresh record for a game that has not started yet.
    pub fn new(
        id: impl Into<String>,
        white_id: impl Into<String>,
        black_id: impl Into<String>,
        time_control: u32,
        time_bonus: u32,
    ) -> Self {
        Self {
            id: id.into(),
            white_id: white_id.into(),
            black_id: black_id.into(),
            time_control,
            time_bonus,
            result: GameResult::Unknown,
            winner: Winner::None,
            moves: Vec::new(),
            created_at: unix_timestamp(),
            finished_at: 0,
        }
    }

    /// Copies moves and outcome from a game snapshot.
    pub fn sync(&mut self, snapshot: &GameSnapshot) {
        self.moves = snapshot
            .moves
            .iter()
            .map(|c| compress_move(c.mv, c.time_left))
            .collect();
        self.result = snapshot.result;
        self.winner = snapshot.winner;
        if self.result.is_terminal() && self.finished_at == 0 {
            self.finished_at = unix_timestamp();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_terminal()
    }

    /// Rebuilds the game by re-applying every stored move from the initial
    /// position. Outcomes that moves alone cannot reproduce (resignation,
    /// timeout, agreement) are restored from the record.
    pub fn replay(&self) -> StoreResult<Game> {
        let mut game = Game::new(self.time_control, self.time_bonus);
        for (i, &packed) in self.moves.iter().enumerate() {
            let (mv, time_left) = decompress_move(packed).ok_or_else(|| {
                StoreError::Corrupt(format!("move {} has invalid encoding {:#x}", i + 1, packed))
            })?;
            game.play_recorded(mv, time_left).map_err(|e| {
                StoreError::Corrupt(format!("move {} ({}) in game {}: {}", i + 1, mv, self.id, e))
            })?;
        }
        game.conclude(self.result, self.winner);
        Ok(game)
    }

    // -----------------------------------------------------------------------
    // Binary codec
    // -----------------------------------------------------------------------

    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        if self.moves.len() > u16::MAX as usize {
            return Err(StoreError::Corrupt(format!(
                "game {} has too many moves ({})",
                self.id,
                self.moves.len()
            )));
        }

        let mut buf = Vec::with_capacity(64 + self.moves.len() * 4);
        buf.extend_from_slice(MAGIC);
        buf.push(FORMAT_VERSION);
        buf.push(self.result.code());
        buf.push(self.winner.code());
        buf.extend_from_slice(&self.time_control.to_be_bytes());
        buf.extend_from_slice(&self.time_bonus.to_be_bytes());
        buf.extend_from_slice(&self.created_at.to_be_bytes());
        buf.extend_from_slice(&self.finished_at.to_be_bytes());
        for s in [&self.id, &self.white_id, &self.black_id] {
            let len = u8::try_from(s.len())
                .map_err(|_| StoreError::Corrupt(format!("identifier too long: {}", s)))?;
            buf.push(len);
            buf.extend_from_slice(s.as_bytes());
        }
        buf.extend_from_slice(&(self.moves.len() as u16).to_be_bytes());
        for packed in &self.moves {
            buf.extend_from_slice(&packed.to_le_bytes());
        }
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        let mut r = Reader { data, pos: 0 };
        if r.take(4)? != MAGIC {
            return Err(StoreError::Corrupt("invalid magic bytes".into()));
        }
        let version = r.u8()?;
        if version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported format version {}",
                version
            )));
        }
        let result_code = r.u8()?;
        let result = GameResult::from_code(result_code)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown result code {}", result_code)))?;
        let winner_code = r.u8()?;
        let winner = Winner::from_code(winner_code)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown winner code {}", winner_code)))?;
        let time_control = u32::from_be_bytes(r.array()?);
        let time_bonus = u32::from_be_bytes(r.array()?);
        let created_at = u64::from_be_bytes(r.array()?);
        let finished_at = u64::from_be_bytes(r.array()?);
        let id = r.string()?;
        let white_id = r.string()?;
        let black_id = r.string()?;
        let count = u16::from_be_bytes(r.array()?) as usize;
        let mut moves = Vec::with_capacity(count);
        for _ in 0..count {
            moves.push(u32::from_le_bytes(r.array()?));
        }

        Ok(Self {
            id,
            white_id,
            black_id,
            time_control,
            time_bonus,
            result,
            winner,
            moves,
            created_at,
            finished_at,
        })
    }
}

/// Bounds-checked cursor over a record buffer.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> StoreResult<&'a [u8]> {
        let end = self.pos + n;
        let slice = self.data.get(self.pos..end).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "record truncated: need {} bytes, have {}",
                end,
                self.data.len()
            ))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> StoreResult<[u8; N]> {
        let slice = self.take(N)?;
        <[u8; N]>::try_from(slice).map_err(|_| StoreError::Corrupt("short read".into()))
    }

    fn u8(&mut self) -> StoreResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn string(&mut self) -> StoreResult<String> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StoreError::Corrupt(format!("identifier is not UTF-8: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Everything the server needs from persistence.
pub trait Store: Send + Sync {
    /// Resolves a session token to its player.
    fn resolve_session(&self, token: &str) -> StoreResult<Option<Player>>;

    /// Persists the initial record of a newly created game.
    fn insert_game(&self, record: &GameRecord) -> StoreResult<()>;

    /// Overwrites a record. Finished games may be moved to cold storage.
    fn update_game(&self, record: &GameRecord) -> StoreResult<()>;

    fn load_game(&self, id: &str) -> StoreResult<Option<GameRecord>>;

    /// Ids of every stored game, sorted.
    fn list_games(&self) -> StoreResult<Vec<String>>;
}

/// One row of a sessions file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub token: String,
    pub player_id: String,
    pub rating: f64,
}

/// Reads a JSON array of [`SessionEntry`] rows.
pub fn read_sessions(path: impl AsRef<Path>) -> StoreResult<Vec<SessionEntry>> {
    let raw = fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&raw)?)
}

fn session_table(entries: Vec<SessionEntry>) -> HashMap<String, Player> {
    entries
        .into_iter()
        .map(|e| (e.token, Player::new(e.player_id, e.rating)))
        .collect()
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Player>>,
    games: RwLock<HashMap<String, GameRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(entries: Vec<SessionEntry>) -> Self {
        Self {
            sessions: RwLock::new(session_table(entries)),
            games: RwLock::default(),
        }
    }

    pub fn add_session(&self, token: impl Into<String>, player: Player) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), player);
    }
}

impl Store for MemoryStore {
    fn resolve_session(&self, token: &str) -> StoreResult<Option<Player>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(token).cloned())
    }

    fn insert_game(&self, record: &GameRecord) -> StoreResult<()> {
        let mut games = self.games.write().unwrap_or_else(PoisonError::into_inner);
        games.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn update_game(&self, record: &GameRecord) -> StoreResult<()> {
        self.insert_game(record)
    }

    fn load_game(&self, id: &str) -> StoreResult<Option<GameRecord>> {
        let games = self.games.read().unwrap_or_else(PoisonError::into_inner);
        Ok(games.get(id).cloned())
    }

    fn list_games(&self) -> StoreResult<Vec<String>> {
        let games = self.games.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = games.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Disk-backed store.
///
/// Directory layout:
/// ```text
/// <base_dir>/
///   active/           # Running games (.rkry)
///   archive/          # Finished, zstd-compressed games (.rkry.zst)
/// ```
pub struct FileStore {
    base_dir: PathBuf,
    active_dir: PathBuf,
    archive_dir: PathBuf,
    sessions: HashMap<String, Player>,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `base_dir`.
    pub fn open(base_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let active_dir = base_dir.join("active");
        let archive_dir = base_dir.join("archive");

        fs::create_dir_all(&active_dir)?;
        fs::create_dir_all(&archive_dir)?;

        log::info!("Game storage initialized at {}", base_dir.display());

        Ok(Self {
            base_dir,
            active_dir,
            archive_dir,
            sessions: HashMap::new(),
        })
    }

    /// Loads the session table from a JSON file of [`SessionEntry`] rows.
    pub fn load_sessions(&mut self, path: impl AsRef<Path>) -> StoreResult<usize> {
        self.sessions = session_table(read_sessions(path.as_ref())?);
        log::info!(
            "Loaded {} sessions from {}",
            self.sessions.len(),
            path.as_ref().display()
        );
        Ok(self.sessions.len())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn active_path(&self, id: &str) -> PathBuf {
        self.active_dir.join(format!("{}.rkry", id))
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.archive_dir.join(format!("{}.rkry.zst", id))
    }

    /// Writes a running game atomically (temp file, then rename).
    fn save_active(&self, record: &GameRecord) -> StoreResult<()> {
        let data = record.to_bytes()?;
        let path = self.active_path(&record.id);
        let temp_path = self.active_dir.join(format!("{}.rkry.tmp", record.id));

        fs::write(&temp_path, &data)?;
        fs::rename(&temp_path, &path)?;

        log::debug!(
            "Saved active game {} ({} bytes, {} moves)",
            record.id,
            data.len(),
            record.moves.len()
        );
        Ok(())
    }

    /// Compresses a finished game into the archive and drops its active file.
    fn archive(&self, record: &GameRecord) -> StoreResult<usize> {
        let raw = record.to_bytes()?;
        let compressed = zstd::encode_all(raw.as_slice(), ZSTD_COMPRESSION_LEVEL)?;

        fs::write(self.archive_path(&record.id), &compressed)?;

        let active_path = self.active_path(&record.id);
        if active_path.exists() {
            fs::remove_file(&active_path)?;
        }

        log::info!(
            "Archived game {}: {} → {} bytes ({} moves, {})",
            record.id,
            raw.len(),
            compressed.len(),
            record.moves.len(),
            record.result
        );
        Ok(compressed.len())
    }

    fn ids_in(dir: &Path, suffix: &str) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let filename = entry?.file_name().to_string_lossy().to_string();
            if let Some(id) = filename.strip_suffix(suffix) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}

impl Store for FileStore {
    fn resolve_session(&self, token: &str) -> StoreResult<Option<Player>> {
        Ok(self.sessions.get(token).cloned())
    }

    fn insert_game(&self, record: &GameRecord) -> StoreResult<()> {
        self.save_active(record)
    }

    fn update_game(&self, record: &GameRecord) -> StoreResult<()> {
        if record.is_finished() {
            self.archive(record).map(|_| ())
        } else {
            self.save_active(record)
        }
    }

    fn load_game(&self, id: &str) -> StoreResult<Option<GameRecord>> {
        let active_path = self.active_path(id);
        if active_path.exists() {
            return GameRecord::from_bytes(&fs::read(&active_path)?).map(Some);
        }

        let archive_path = self.archive_path(id);
        if archive_path.exists() {
            let compressed = fs::read(&archive_path)?;
            let raw = zstd::decode_all(compressed.as_slice())?;
            return GameRecord::from_bytes(&raw).map(Some);
        }

        Ok(None)
    }

    fn list_games(&self) -> StoreResult<Vec<String>> {
        let mut ids = Self::ids_in(&self.active_dir, ".rkry")?;
        ids.extend(Self::ids_in(&self.archive_dir, ".rkry.zst")?);
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Utility: current unix timestamp
// ---------------------------------------------------------------------------

/// Returns the current Unix timestamp in seconds.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
