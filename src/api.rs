//! REST API around the real-time server.
//!
//! Live play happens over the WebSocket at `/ws`; these endpoints expose
//! the queue table and persisted games for clients and tooling.
//!
//! The API is documented with OpenAPI/Swagger via `utoipa`.
//! Swagger UI is available at `/swagger-ui/`.

use actix::Addr;
use actix_web::{HttpResponse, Responder, web};
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

use crate::config::ServerConfig;
use crate::export::{self, GameDetail, MoveDetail};
use crate::hub::Hub;
use crate::storage::Store;
use crate::types::*;

/// Shared application state, wrapped in `web::Data` and shared across all
/// HTTP and WebSocket handlers.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub hub: Addr<Hub>,
    pub config: ServerConfig,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// A matchmaking queue clients can join with `/ws?id=<id>`.
#[derive(Debug, Serialize, ToSchema)]
pub struct QueueInfo {
    pub id: String,
    /// Initial seconds per side.
    pub control: u32,
    /// Seconds added per move.
    pub bonus: u32,
    /// `control+bonus`, as in PGN.
    pub label: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GameListResponse {
    pub games: Vec<String>,
    pub total: usize,
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> HttpResponse {
    log::error!("{}: {}", context, e);
    HttpResponse::InternalServerError().json(ErrorResponse {
        error: format!("{}: {}", context, e),
    })
}

fn not_found(id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: format!("game {} not found", id),
    })
}

// ---------------------------------------------------------------------------
// OpenAPI definition
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Rookery chess server",
        version = "0.1.0",
        description = "Matchmaking queues and persisted games of the real-time chess server. \
            Live games are played over the WebSocket endpoint `/ws?id=<queue or room>&token=<session>`.",
        license(name = "MIT")
    ),
    paths(list_queues, list_games, get_game, get_game_pgn),
    components(schemas(
        QueueInfo,
        GameListResponse,
        GameDetail,
        MoveDetail,
        ErrorResponse,
        GameResult,
        Winner,
    )),
    tags(
        (name = "queues", description = "Matchmaking queues"),
        (name = "games", description = "Persisted games"),
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// API Handlers
// ---------------------------------------------------------------------------

/// List the matchmaking queues.
#[utoipa::path(
    get,
    path = "/api/queues",
    tag = "queues",
    responses(
        (status = 200, description = "Queue table", body = [QueueInfo]),
    )
)]
pub async fn list_queues() -> impl Responder {
    let queues: Vec<QueueInfo> = TIME_CONTROLS
        .iter()
        .map(|tc| QueueInfo {
            id: tc.queue_id(),
            control: tc.control,
            bonus: tc.bonus,
            label: tc.to_string(),
        })
        .collect();
    HttpResponse::Ok().json(queues)
}

/// List the ids of every persisted game.
#[utoipa::path(
    get,
    path = "/api/games",
    tag = "games",
    responses(
        (status = 200, description = "Stored game ids", body = GameListResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse),
    )
)]
pub async fn list_games(data: web::Data<AppState>) -> impl Responder {
    match data.store.list_games() {
        Ok(games) => HttpResponse::Ok().json(GameListResponse {
            total: games.len(),
            games,
        }),
        Err(e) => internal_error("cannot list games", e),
    }
}

/// Get a persisted game with SAN, FEN and clock for every move.
#[utoipa::path(
    get,
    path = "/api/games/{game_id}",
    tag = "games",
    params(
        ("game_id" = String, Path, description = "Room id the game was played in")
    ),
    responses(
        (status = 200, description = "Replayed game", body = GameDetail),
        (status = 404, description = "Game not found", body = ErrorResponse),
    )
)]
pub async fn get_game(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let id = path.into_inner();
    let record = match data.store.load_game(&id) {
        Ok(Some(record)) => record,
        Ok(None) => return not_found(&id),
        Err(e) => return internal_error("cannot load game", e),
    };
    match record.replay() {
        Ok(game) => HttpResponse::Ok().json(GameDetail::new(&record, &game)),
        Err(e) => internal_error("cannot replay game", e),
    }
}

/// Export a persisted game as PGN.
#[utoipa::path(
    get,
    path = "/api/games/{game_id}/pgn",
    tag = "games",
    params(
        ("game_id" = String, Path, description = "Room id the game was played in")
    ),
    responses(
        (status = 200, description = "PGN text", body = String, content_type = "application/x-chess-pgn"),
        (status = 404, description = "Game not found", body = ErrorResponse),
    )
)]
pub async fn get_game_pgn(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let id = path.into_inner();
    let record = match data.store.load_game(&id) {
        Ok(Some(record)) => record,
        Ok(None) => return not_found(&id),
        Err(e) => return internal_error("cannot load game", e),
    };
    match record.replay() {
        Ok(game) => HttpResponse::Ok()
            .content_type("application/x-chess-pgn")
            .body(export::format_pgn(&record, &game)),
        Err(e) => internal_error("cannot replay game", e),
    }
}

/// Configures all API routes plus the WebSocket endpoint.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/queues", web::get().to(list_queues))
            .route("/games", web::get().to(list_games))
            .route("/games/{game_id}", web::get().to(get_game))
            .route("/games/{game_id}/pgn", web::get().to(get_game_pgn)),
    )
    .route("/ws", web::get().to(crate::ws::ws_connect));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Game;
    use crate::storage::{GameRecord, MemoryStore};
    use actix::Actor;
    use actix_web::{App, test};

    fn state_with_game() -> web::Data<AppState> {
        let store = Arc::new(MemoryStore::new());
        let mut game = Game::new(60, 0);
        let e4 = Move::new(
            Square::from_algebraic("e2").unwrap(),
            Square::from_algebraic("e4").unwrap(),
            MoveKind::DoublePawnPush,
        );
        game.play(e4).unwrap();
        let mut record = GameRecord::new("g1", "alice", "bob", 60, 0);
        record.sync(&game.snapshot());
        store.insert_game(&record).unwrap();

        let config = ServerConfig::default();
        let hub = Hub::new(store.clone(), config).start();
        web::Data::new(AppState { store, hub, config })
    }

    #[actix_web::test]
    async fn test_list_queues() {
        let app = test::init_service(App::new().configure(configure_routes)).await;
        let req = test::TestRequest::get().uri("/api/queues").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let queues = body.as_array().unwrap();
        assert_eq!(queues.len(), 9);
        assert_eq!(queues[3]["id"], "4");
        assert_eq!(queues[3]["label"], "180+2");
    }

    #[actix_web::test]
    async fn test_get_game_and_pgn() {
        let app = test::init_service(
            App::new()
                .app_data(state_with_game())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/games/g1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["white_id"], "alice");
        assert_eq!(body["moves"][0]["san"], "e4");
        assert_eq!(body["moves"][0]["time_left"], 60);

        let req = test::TestRequest::get().uri("/api/games/g1/pgn").to_request();
        let pgn = test::call_and_read_body(&app, req).await;
        let pgn = String::from_utf8(pgn.to_vec()).unwrap();
        assert!(pgn.contains("1. e4 *"));

        let req = test::TestRequest::get().uri("/api/games").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 1);
    }

    #[actix_web::test]
    async fn test_missing_game_is_404() {
        let app = test::init_service(
            App::new()
                .app_data(state_with_game())
                .configure(configure_routes),
        )
        .await;
        for uri in ["/api/games/nope", "/api/games/nope/pgn"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
        }
    }

    #[actix_web::test]
    async fn test_ws_rejects_unknown_token() {
        let app = test::init_service(
            App::new()
                .app_data(state_with_game())
                .configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/ws?id=4&token=bogus")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);
    }
}
