use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use trendotalk_api::auth::{self, AppState, AppStateInner};
use trendotalk_api::media::MediaClient;
use trendotalk_api::middleware::require_auth;
use trendotalk_api::{dm, posts, users, vibes};
use trendotalk_gateway::connection::{self, ChatPeers};
use trendotalk_gateway::dispatcher::Dispatcher;

/// Housekeeping cadence. The sweep only reclaims storage for expired
/// temporary blocks and vibes; every read path re-checks expiry live, so
/// nothing depends on this timer for correctness.
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    jwt_secret: String,
    peers: Arc<dyn ChatPeers>,
}

/// Chat peer lookups for typing relays, backed by the store.
struct DbChatPeers {
    state: AppState,
}

impl ChatPeers for DbChatPeers {
    fn peer_of(
        &self,
        chat_id: uuid::Uuid,
        user_id: uuid::Uuid,
    ) -> futures_util::future::BoxFuture<'_, Option<uuid::Uuid>> {
        let db = self.state.clone();
        Box::pin(async move {
            let cid = chat_id.to_string();
            let uid = user_id.to_string();
            let result =
                tokio::task::spawn_blocking(move || db.db.chat_peer_of(&cid, &uid)).await;
            match result {
                Ok(Ok(Some(peer))) => peer.parse().ok(),
                _ => None,
            }
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trendotalk=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("TRENDOTALK_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("TRENDOTALK_DB_PATH").unwrap_or_else(|_| "trendotalk.db".into());
    let host = std::env::var("TRENDOTALK_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("TRENDOTALK_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = trendotalk_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        media: MediaClient::from_env(),
    });

    let state = ServerState {
        dispatcher: dispatcher.clone(),
        jwt_secret: jwt_secret.clone(),
        peers: Arc::new(DbChatPeers {
            state: app_state.clone(),
        }),
    };

    spawn_housekeeping(app_state.clone());

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/dm/{to_user_id}/messages", post(dm::send_message))
        .route("/dm/requests", get(dm::list_requests))
        .route("/dm/requests/{id}/allow", post(dm::allow_request))
        .route("/dm/requests/{id}/dismiss", post(dm::dismiss_request))
        .route("/dm/requests/{id}/block", post(dm::block_request))
        .route("/dm/chats", get(dm::list_chats))
        .route("/dm/chats/{id}/messages", get(dm::chat_messages))
        .route("/dm/chats/{id}/status", get(dm::chat_status))
        .route("/dm/chats/{id}/block", post(dm::block_chat))
        .route("/posts", post(posts::create_post))
        .route("/posts", get(posts::feed))
        .route("/posts/{id}/like", post(posts::like_post))
        .route("/posts/{id}/dislike", post(posts::dislike_post))
        .route("/posts/{id}/vote", post(posts::vote_post))
        .route("/users/{id}", get(users::get_profile))
        .route("/users/{id}/follow", post(users::follow))
        .route("/users/{id}/unfollow", post(users::unfollow))
        .route("/vibes", post(vibes::create_vibe))
        .route("/vibes", get(vibes::list_vibes))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("TrendoTalk server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.jwt_secret, state.peers)
    })
}

fn spawn_housekeeping(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        // first tick fires immediately; that's fine, the sweep is idempotent
        loop {
            interval.tick().await;
            let db = state.clone();
            let result = tokio::task::spawn_blocking(move || {
                let now = chrono::Utc::now();
                let blocks = db.db.purge_expired_blocks(now)?;
                let vibes = db.db.purge_expired_vibes(now)?;
                Ok::<_, trendotalk_db::DmError>((blocks, vibes))
            })
            .await;

            match result {
                Ok(Ok((blocks, vibes))) => {
                    info!("Housekeeping: purged {} expired blocks, {} expired vibes", blocks, vibes);
                }
                Ok(Err(e)) => warn!("Housekeeping sweep failed: {}", e),
                Err(e) => warn!("Housekeeping task panicked: {}", e),
            }
        }
    });
}
