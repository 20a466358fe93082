//! `rookery` command line: run the server, count perft nodes, export games.
//!
//! ```bash
//! # Start the server (default: http://0.0.0.0:8080)
//! rookery serve --data-dir data --sessions sessions.json
//!
//! # Move-generator node counts
//! rookery perft --depth 4 --divide
//!
//! # Export persisted games
//! rookery export --list
//! rookery export --game-id <id> --format pgn
//! ```

use actix::Actor;
use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::{Duration, Instant};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use rookery::api::{self, ApiDoc, AppState};
use rookery::config::ServerConfig;
use rookery::export::{self, ExportFormat};
use rookery::hub::Hub;
use rookery::matchmaking::TolerancePolicy;
use rookery::storage::{self, FileStore, MemoryStore, Store};
use rookery::types::TIME_CONTROLS;
use rookery::{fen, movegen};

#[derive(Parser, Debug)]
#[command(name = "rookery")]
#[command(about = "Real-time chess server with rating matchmaking")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the WebSocket + REST server.
    Serve {
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Directory for game storage (active + archive).
        #[arg(long, default_value = "data")]
        data_dir: String,

        /// JSON file of `{token, player_id, rating}` session rows.
        #[arg(long)]
        sessions: Option<String>,

        /// Seconds between pairing sweeps.
        #[arg(long, default_value_t = 3)]
        pairing_interval: u64,

        #[arg(long, default_value_t = 50.0)]
        initial_tolerance: f64,

        /// Added to every unpaired ticket's tolerance after each sweep.
        #[arg(long, default_value_t = 50.0)]
        tolerance_step: f64,

        /// Upper bound for the tolerance; unbounded when omitted.
        #[arg(long)]
        max_tolerance: Option<f64>,

        /// Seconds an empty room waits before closing.
        #[arg(long, default_value_t = 20)]
        room_ttl: u32,
    },

    /// Count move-generator leaf nodes from a position.
    Perft {
        #[arg(long, default_value = fen::INITIAL_FEN)]
        fen: String,

        #[arg(short, long, default_value_t = 4)]
        depth: u32,

        /// Print per-move counts at the root.
        #[arg(long)]
        divide: bool,
    },

    /// Export persisted games in human-readable format.
    Export {
        #[arg(long, default_value = "data")]
        data_dir: String,

        /// Output format: text, pgn, or json.
        #[arg(short, long, default_value = "text")]
        format: String,

        #[arg(short, long)]
        game_id: Option<String>,

        /// List stored games (no export).
        #[arg(short, long)]
        list: bool,

        /// Export every stored game.
        #[arg(short, long)]
        all: bool,

        /// Write output to a file instead of stdout.
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            data_dir,
            sessions,
            pairing_interval,
            initial_tolerance,
            tolerance_step,
            max_tolerance,
            room_ttl,
        } => {
            let config = ServerConfig {
                pairing_interval: Duration::from_secs(pairing_interval),
                tolerance: TolerancePolicy {
                    initial: initial_tolerance,
                    step: tolerance_step,
                    max: max_tolerance.unwrap_or(f64::INFINITY),
                },
                room_ttl,
                ..ServerConfig::default()
            };
            let store = open_store(&data_dir, sessions.as_deref())?;
            run_server(&host, port, store, config).await
        }
        Commands::Perft { fen, depth, divide } => run_perft(&fen, depth, divide),
        Commands::Export {
            data_dir,
            format,
            game_id,
            list,
            all,
            output,
        } => {
            let fmt: ExportFormat = format
                .parse()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

            export::run_export(
                &data_dir,
                fmt,
                game_id.as_deref(),
                list,
                all,
                output.as_deref(),
            )
            .map_err(std::io::Error::other)
        }
    }
}

/// File store under `data_dir`, or an in-memory store if it cannot be
/// opened. Sessions are loaded into whichever store is used.
fn open_store(data_dir: &str, sessions: Option<&str>) -> std::io::Result<Arc<dyn Store>> {
    match FileStore::open(data_dir) {
        Ok(mut store) => {
            if let Some(path) = sessions {
                store.load_sessions(path).map_err(std::io::Error::other)?;
            }
            Ok(Arc::new(store))
        }
        Err(e) => {
            log::warn!("cannot open {}: {}; games will not outlive the process", data_dir, e);
            let entries = match sessions {
                Some(path) => storage::read_sessions(path).map_err(std::io::Error::other)?,
                None => Vec::new(),
            };
            Ok(Arc::new(MemoryStore::with_sessions(entries)))
        }
    }
}

async fn run_server(
    host: &str,
    port: u16,
    store: Arc<dyn Store>,
    config: ServerConfig,
) -> std::io::Result<()> {
    let openapi = ApiDoc::openapi();

    let hub = Hub::new(store.clone(), config).start();
    let state = web::Data::new(AppState { store, hub, config });

    log::info!("Starting rookery on {}:{}", host, port);
    for tc in TIME_CONTROLS {
        log::info!("  queue {} -> {}", tc.queue_id(), tc);
    }
    log::info!(
        "Pairing every {:?}, tolerance {}+{} up to {}",
        config.pairing_interval,
        config.tolerance.initial,
        config.tolerance.step,
        config.tolerance.max
    );
    log::info!("WebSocket endpoint: ws://{}:{}/ws", host, port);
    log::info!("Swagger UI available at http://{}:{}/swagger-ui/", host, port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind((host, port))?
    .run()
    .await
}

fn run_perft(fen_text: &str, depth: u32, divide: bool) -> std::io::Result<()> {
    let board = fen::parse(fen_text)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let started = Instant::now();
    if divide {
        let mut total = 0;
        for (mv, nodes) in movegen::divide(&board, depth) {
            println!("{}: {}", mv, nodes);
            total += nodes;
        }
        println!("\nNodes: {}", total);
    } else {
        let counts = movegen::perft_counts(&board, depth);
        println!("Depth:       {}", depth);
        println!("Nodes:       {}", counts.nodes);
        println!("Captures:    {}", counts.captures);
        println!("En passant:  {}", counts.en_passant);
        println!("Castles:     {}", counts.castles);
        println!("Promotions:  {}", counts.promotions);
        println!("Checks:      {}", counts.checks);
        println!("Checkmates:  {}", counts.checkmates);
    }
    println!("Time:        {:?}", started.elapsed());
    Ok(())
}
