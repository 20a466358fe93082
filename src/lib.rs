//! # Rookery: real-time chess server core
//!
//! Two players are paired by rating in a time-control queue, moved into a
//! room and play over a WebSocket while the server validates every move,
//! runs the clocks and persists the finished game.
//!
//! ## Layers
//!
//! - **Rules engine** ([`types`], [`bitboard`], [`movegen`], [`fen`],
//!   [`san`], [`game`]): bitboard position, legal move generation, FEN and
//!   SAN, terminal detection and clocks.
//! - **Matchmaking** ([`rbtree`], [`matchmaking`]): a red-black tree keyed
//!   by (rating, player id) and the pairing sweep over it.
//! - **Actors** ([`hub`], [`queue`], [`room`], [`game_loop`], [`ws`]): one
//!   actor per queue, room, game and connection, all on actix.
//! - **Edges** ([`protocol`], [`storage`], [`api`], [`export`]): the wire
//!   format, persistence, REST endpoints and offline export.
//!
//! ## Endpoints
//!
//! | Method | Path                          | Description                    |
//! |--------|-------------------------------|--------------------------------|
//! | GET    | `/ws?id=<target>&token=<tok>` | Join a queue or room           |
//! | GET    | `/api/queues`                 | Time-control table             |
//! | GET    | `/api/games`                  | Persisted game ids             |
//! | GET    | `/api/games/{id}`             | Replayed game                  |
//! | GET    | `/api/games/{id}/pgn`         | PGN export                     |
//! | GET    | `/swagger-ui/`                | Swagger UI documentation       |

pub mod api;
pub mod bitboard;
pub mod config;
pub mod error;
pub mod export;
pub mod fen;
pub mod game;
pub mod game_loop;
pub mod hub;
pub mod matchmaking;
pub mod movegen;
pub mod protocol;
pub mod queue;
pub mod rbtree;
pub mod room;
pub mod san;
pub mod storage;
pub mod types;
pub mod ws;
