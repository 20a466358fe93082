//! Human-readable export of persisted games.
//!
//! Records are replayed from their stored moves, so every format carries
//! SAN, clocks and the final position even though only packed moves are
//! on disk.
//!
//! # Supported Formats
//!
//! - **text**: move table with clocks, final board diagram and metadata.
//! - **pgn**: Seven Tag Roster plus `TimeControl` and `Termination`, SAN
//!   movetext wrapped at 80 columns.
//! - **json**: the same document `GET /api/games/{id}` serves.

use serde::Serialize;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::bitboard::Bitboard;
use crate::game::Game;
use crate::storage::{FileStore, GameRecord, Store};
use crate::types::*;

// ---------------------------------------------------------------------------
// Export format enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Pgn,
    Json,
}

impl FromStr for ExportFormat {
    type Err = String;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "pgn" => Ok(Self::Pgn),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown export format '{}'. Valid: text, pgn, json",
                s
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Replayed game document
// ---------------------------------------------------------------------------

/// One ply of a replayed game.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MoveDetail {
    pub san: String,
    /// Position after the move.
    pub fen: String,
    /// Mover's clock after the move, in seconds.
    pub time_left: u32,
    /// 16-bit wire encoding.
    pub raw: u16,
}

/// A persisted game with its moves expanded.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameDetail {
    pub id: String,
    pub white_id: String,
    pub black_id: String,
    pub time_control: u32,
    pub time_bonus: u32,
    pub result: GameResult,
    pub winner: Winner,
    pub created_at: u64,
    pub finished_at: u64,
    pub final_fen: String,
    pub moves: Vec<MoveDetail>,
}

impl GameDetail {
    pub fn new(record: &GameRecord, game: &Game) -> Self {
        Self {
            id: record.id.clone(),
            white_id: record.white_id.clone(),
            black_id: record.black_id.clone(),
            time_control: record.time_control,
            time_bonus: record.time_bonus,
            result: record.result,
            winner: record.winner,
            created_at: record.created_at,
            finished_at: record.finished_at,
            final_fen: game.fen(),
            moves: game
                .moves()
                .iter()
                .map(|c| MoveDetail {
                    san: c.san.clone(),
                    fen: c.fen.clone(),
                    time_left: c.time_left,
                    raw: c.mv.raw(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp formatting
// ---------------------------------------------------------------------------

/// UTC datetime for a Unix timestamp; `"-"` for 0.
fn format_timestamp(ts: u64) -> String {
    if ts == 0 {
        return "-".to_string();
    }
    let days = ts / 86400;
    let time_of_day = ts % 86400;
    let (year, month, day) = days_to_date(days);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        year,
        month,
        day,
        time_of_day / 3600,
        (time_of_day % 3600) / 60,
        time_of_day % 60
    )
}

/// Converts days since Unix epoch to (year, month, day).
fn days_to_date(days: u64) -> (u64, u64, u64) {
    // http://howardhinnant.github.io/date_algorithms.html
    let z = days + 719468;
    let era = z / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// Clock value as `m:ss`.
fn format_clock(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

// ---------------------------------------------------------------------------
// Text format
// ---------------------------------------------------------------------------

fn board_diagram(board: &Bitboard) -> String {
    let mut out = String::new();
    for rank in (0..8u8).rev() {
        out.push_str(&format!("{} ", rank + 1));
        for file in 0..8u8 {
            let c = board
                .piece_at(Square::new(file, rank))
                .map_or('.', Piece::to_fen_char);
            out.push(' ');
            out.push(c);
        }
        out.push('\n');
    }
    out.push_str("   a b c d e f g h\n");
    out
}

fn time_control_label(record: &GameRecord) -> String {
    if record.time_control == 0 {
        "untimed".to_string()
    } else {
        format!("{}+{}", record.time_control, record.time_bonus)
    }
}

pub fn format_text(record: &GameRecord, game: &Game) -> String {
    let mut out = String::new();

    out.push_str(&format!("Game {}\n", record.id));
    out.push_str(&format!("  White:        {}\n", record.white_id));
    out.push_str(&format!("  Black:        {}\n", record.black_id));
    out.push_str(&format!("  Time control: {}\n", time_control_label(record)));
    out.push_str(&format!("  Started:      {}\n", format_timestamp(record.created_at)));
    out.push_str(&format!("  Ended:        {}\n", format_timestamp(record.finished_at)));
    out.push_str(&format!("  Result:       {} ({})\n", pgn_result(record), record.result));
    out.push_str(&format!("  Plies:        {}\n\n", game.moves().len()));

    for (n, pair) in game.moves().chunks(2).enumerate() {
        let white = &pair[0];
        out.push_str(&format!(
            "{:>4}. {:<8} {:>6}",
            n + 1,
            white.san,
            format_clock(white.time_left)
        ));
        if let Some(black) = pair.get(1) {
            out.push_str(&format!(
                "   {:<8} {:>6}",
                black.san,
                format_clock(black.time_left)
            ));
        }
        out.push('\n');
    }

    out.push('\n');
    out.push_str(&board_diagram(game.board()));
    out.push_str(&format!("\n  FEN: {}\n", game.fen()));
    out
}

// ---------------------------------------------------------------------------
// PGN format
// ---------------------------------------------------------------------------

fn pgn_result(record: &GameRecord) -> &'static str {
    match (record.result, record.winner) {
        (GameResult::Unknown, _) => "*",
        (_, Winner::White) => "1-0",
        (_, Winner::Black) => "0-1",
        (_, Winner::None) => "1/2-1/2",
    }
}

fn pgn_termination(result: GameResult) -> &'static str {
    match result {
        GameResult::Unknown => "unterminated",
        GameResult::Timeout => "time forfeit",
        _ => "normal",
    }
}

pub fn format_pgn(record: &GameRecord, game: &Game) -> String {
    let mut out = String::new();
    let result = pgn_result(record);

    out.push_str("[Event \"Rated game\"]\n");
    out.push_str("[Site \"rookery\"]\n");
    if record.created_at > 0 {
        let (y, m, d) = days_to_date(record.created_at / 86400);
        out.push_str(&format!("[Date \"{:04}.{:02}.{:02}\"]\n", y, m, d));
    } else {
        out.push_str("[Date \"????.??.??\"]\n");
    }
    out.push_str("[Round \"-\"]\n");
    out.push_str(&format!("[White \"{}\"]\n", record.white_id));
    out.push_str(&format!("[Black \"{}\"]\n", record.black_id));
    out.push_str(&format!("[Result \"{}\"]\n", result));
    let control = if record.time_control == 0 {
        "-".to_string()
    } else {
        format!("{}+{}", record.time_control, record.time_bonus)
    };
    out.push_str(&format!("[TimeControl \"{}\"]\n", control));
    out.push_str(&format!("[Termination \"{}\"]\n", pgn_termination(record.result)));
    out.push('\n');

    let mut movetext = String::new();
    for (i, completed) in game.moves().iter().enumerate() {
        if i % 2 == 0 {
            movetext.push_str(&format!("{}. ", i / 2 + 1));
        }
        movetext.push_str(&completed.san);
        movetext.push(' ');
    }
    movetext.push_str(result);

    out.push_str(&wrap_pgn_text(&movetext, 80));
    out.push('\n');
    out
}

/// Wraps PGN movetext at word boundaries to fit within `max_width` columns.
fn wrap_pgn_text(text: &str, max_width: usize) -> String {
    let mut result = String::new();
    let mut line_len = 0;

    for word in text.split_whitespace() {
        if line_len > 0 && line_len + 1 + word.len() > max_width {
            result.push('\n');
            line_len = 0;
        }
        if line_len > 0 {
            result.push(' ');
            line_len += 1;
        }
        result.push_str(word);
        line_len += word.len();
    }
    result
}

// ---------------------------------------------------------------------------
// JSON format
// ---------------------------------------------------------------------------

pub fn format_json(record: &GameRecord, game: &Game) -> Result<String, String> {
    serde_json::to_string_pretty(&GameDetail::new(record, game))
        .map_err(|e| format!("JSON serialization failed: {}", e))
}

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

/// Runs the `export` subcommand against a file store.
pub fn run_export(
    data_dir: &str,
    format: ExportFormat,
    game_id: Option<&str>,
    list_only: bool,
    all: bool,
    output: Option<&str>,
) -> Result<(), String> {
    let store = FileStore::open(data_dir)
        .map_err(|e| format!("Failed to open storage at '{}': {}", data_dir, e))?;

    if list_only {
        return run_list(&store);
    }
    if all {
        return run_export_all(&store, format, output);
    }

    let id = game_id.ok_or("Please specify --game-id <ID> or use --list / --all")?;
    let record = load(&store, id)?;
    let text = format_game(&record, format)?;
    write_output(&text, output)
}

fn load(store: &dyn Store, id: &str) -> Result<GameRecord, String> {
    store
        .load_game(id)
        .map_err(|e| format!("Failed to load game '{}': {}", id, e))?
        .ok_or_else(|| format!("Game '{}' not found", id))
}

fn run_list(store: &dyn Store) -> Result<(), String> {
    let ids = store.list_games().map_err(|e| e.to_string())?;
    if ids.is_empty() {
        println!("No games found in storage.");
        return Ok(());
    }

    println!("{:<18} {:<14} {:<14} {:>8} {:>6}  Result", "Id", "White", "Black", "Control", "Plies");
    for id in &ids {
        match load(store, id) {
            Ok(record) => println!(
                "{:<18} {:<14} {:<14} {:>8} {:>6}  {} ({})",
                record.id,
                record.white_id,
                record.black_id,
                time_control_label(&record),
                record.moves.len(),
                pgn_result(&record),
                record.result
            ),
            Err(e) => println!("{:<18} unreadable: {}", id, e),
        }
    }
    println!("\n{} game(s)", ids.len());
    Ok(())
}

fn run_export_all(store: &dyn Store, format: ExportFormat, output: Option<&str>) -> Result<(), String> {
    let ids = store.list_games().map_err(|e| e.to_string())?;
    if ids.is_empty() {
        println!("No games found in storage.");
        return Ok(());
    }

    let mut parts = Vec::with_capacity(ids.len());
    for id in &ids {
        let record = load(store, id)?;
        parts.push(format_game(&record, format)?);
    }

    let combined = match format {
        ExportFormat::Text => parts.join("\n----------------------------------------\n\n"),
        ExportFormat::Pgn => parts.join("\n"),
        ExportFormat::Json => format!("[\n{}\n]\n", parts.join(",\n")),
    };
    write_output(&combined, output)?;
    eprintln!("Exported {} game(s) in {:?} format.", ids.len(), format);
    Ok(())
}

fn format_game(record: &GameRecord, format: ExportFormat) -> Result<String, String> {
    let game = record
        .replay()
        .map_err(|e| format!("Cannot replay game '{}': {}", record.id, e))?;
    match format {
        ExportFormat::Text => Ok(format_text(record, &game)),
        ExportFormat::Pgn => Ok(format_pgn(record, &game)),
        ExportFormat::Json => format_json(record, &game),
    }
}

fn write_output(content: &str, output_path: Option<&str>) -> Result<(), String> {
    match output_path {
        Some(path) => {
            std::fs::write(path, content)
                .map_err(|e| format!("Failed to write to '{}': {}", path, e))?;
            eprintln!("Written to: {}", path);
            Ok(())
        }
        None => {
            print!("{}", content);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::EndReason;
    use crate::storage::MemoryStore;

    fn mv(from: &str, to: &str, kind: MoveKind) -> Move {
        Move::new(
            Square::from_algebraic(from).unwrap(),
            Square::from_algebraic(to).unwrap(),
            kind,
        )
    }

    fn sample() -> (GameRecord, Game) {
        let mut game = Game::new(180, 2);
        for m in [
            mv("e2", "e4", MoveKind::DoublePawnPush),
            mv("e7", "e5", MoveKind::DoublePawnPush),
            mv("g1", "f3", MoveKind::Quiet),
            mv("b8", "c6", MoveKind::Quiet),
            mv("f1", "b5", MoveKind::Quiet),
            mv("a7", "a6", MoveKind::Quiet),
        ] {
            game.play(m).unwrap();
        }
        game.end(EndReason::Resignation(Color::Black));
        let mut record = GameRecord::new("AbCdEfGh12345678", "alice", "bob", 180, 2);
        record.sync(&game.snapshot());
        record.created_at = 1740000000;
        let replayed = record.replay().unwrap();
        (record, replayed)
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("PGN".parse::<ExportFormat>(), Ok(ExportFormat::Pgn));
        assert_eq!("txt".parse::<ExportFormat>(), Ok(ExportFormat::Text));
        assert!("yaml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_format_pgn() {
        let (record, game) = sample();
        let pgn = format_pgn(&record, &game);
        assert!(pgn.contains("[White \"alice\"]"));
        assert!(pgn.contains("[Date \"2025.02.19\"]"));
        assert!(pgn.contains("[Result \"1-0\"]"));
        assert!(pgn.contains("[TimeControl \"180+2\"]"));
        assert!(pgn.contains("[Termination \"normal\"]"));
        assert!(pgn.contains("1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 1-0"));
    }

    #[test]
    fn test_pgn_result_tags() {
        let (mut record, _) = sample();
        record.result = GameResult::Unknown;
        record.winner = Winner::None;
        assert_eq!(pgn_result(&record), "*");
        record.result = GameResult::Stalemate;
        assert_eq!(pgn_result(&record), "1/2-1/2");
        record.result = GameResult::Timeout;
        record.winner = Winner::Black;
        assert_eq!(pgn_result(&record), "0-1");
        assert_eq!(pgn_termination(GameResult::Timeout), "time forfeit");
    }

    #[test]
    fn test_format_text() {
        let (record, game) = sample();
        let text = format_text(&record, &game);
        assert!(text.contains("Game AbCdEfGh12345678"));
        assert!(text.contains("180+2"));
        assert!(text.contains("resignation"));
        assert!(text.contains("Nf3"));
        assert!(text.contains("3:02"));
        assert!(text.contains("   a b c d e f g h"));
        assert!(text.contains(&game.fen()));
    }

    #[test]
    fn test_format_json() {
        let (record, game) = sample();
        let json = format_json(&record, &game).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["moves"].as_array().unwrap().len(), 6);
        assert_eq!(parsed["moves"][2]["san"], "Nf3");
        assert_eq!(parsed["result"], "Resignation");
        assert_eq!(parsed["winner"], "White");
    }

    #[test]
    fn test_format_game_through_store() {
        let (record, _) = sample();
        let store = MemoryStore::new();
        store.insert_game(&record).unwrap();
        let loaded = load(&store, &record.id).unwrap();
        let pgn = format_game(&loaded, ExportFormat::Pgn).unwrap();
        assert!(pgn.starts_with("[Event"));
        assert!(load(&store, "missing").is_err());
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(format_timestamp(0), "-");
        assert_eq!(format_timestamp(1740000000), "2025-02-19 21:20:00 UTC");
        assert_eq!(format_clock(125), "2:05");
    }

    #[test]
    fn test_wrap_pgn_text() {
        let long = "1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 4. Ba4 Nf6 5. O-O Be7 6. Re1 b5 7. Bb3 d6";
        let wrapped = wrap_pgn_text(long, 40);
        for line in wrapped.lines() {
            assert!(line.len() <= 40, "Line too long: {}", line);
        }
    }
}
