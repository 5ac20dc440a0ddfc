use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use bistro_api::cache::TtlCache;
use bistro_api::{AppState, AppStateInner, STATS_CACHE_TTL, messages, ratings, rooms, unread};
use bistro_db::SqliteStore;
use bistro_gateway::connection;
use bistro_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bistro_server=debug,bistro_api=debug,bistro_gateway=debug,\
                 bistro_unread=debug,bistro_db=debug,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // Config
    let db_path = std::env::var("BISTRO_DB_PATH").unwrap_or_else(|_| "bistro.db".into());
    let host = std::env::var("BISTRO_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("BISTRO_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let store = Arc::new(SqliteStore::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        chat: store.clone(),
        ratings: store,
        dispatcher: dispatcher.clone(),
        stats_cache: TtlCache::new(STATS_CACHE_TTL),
    });

    // Routes
    let api_routes = Router::new()
        .route("/rooms", post(rooms::create_room))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route("/rooms/{room_id}/read", post(rooms::mark_read))
        .route("/rooms/{room_id}/messages", get(messages::get_messages))
        .route("/rooms/{room_id}/messages", post(messages::send_message))
        .route("/users/{user_id}/unread", get(unread::get_unread))
        .route("/places/{place_id}/rating", put(ratings::rate_place))
        .route("/places/{place_id}/stats", get(ratings::get_stats))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state);

    let app = Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Bistro server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher.clone(), state.chat.clone())
    })
}
