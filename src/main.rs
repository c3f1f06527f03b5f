//! Predictive trivia backend entrypoint wiring REST, SSE, storage supervision and outbox dispatch.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, sync::watch};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use predictive_trivia_back::{
    config::AppConfig,
    dao::{
        game_store::{GameStore, memory::MemoryGameStore},
        storage::StorageError,
    },
    routes,
    services::{outbox_dispatcher::OutboxDispatcher, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);

    spawn_storage_supervisor(app_state.clone());

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let dispatcher = tokio::spawn(OutboxDispatcher::new(app_state.clone()).run(async move {
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
    }));

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    let _ = stop_tx.send(true);
    dispatcher.await.context("joining outbox dispatcher")?;
    Ok(())
}

/// Start the storage supervisor: SQLite when `DATABASE_URL` is set, in-memory otherwise.
fn spawn_storage_supervisor(state: SharedState) {
    match env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()) {
        #[cfg(feature = "sqlite-store")]
        Some(url) => {
            info!("using SQLite game store");
            tokio::spawn(storage_supervisor::run(state, move || {
                let url = url.clone();
                async move {
                    use predictive_trivia_back::dao::game_store::sqlite::SqliteGameStore;
                    let store = SqliteGameStore::connect(&url).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn GameStore>)
                }
            }));
        }
        #[cfg(not(feature = "sqlite-store"))]
        Some(_) => {
            warn!("DATABASE_URL is set but SQLite support is not compiled in; using memory store");
            spawn_memory_store(state);
        }
        None => {
            info!("DATABASE_URL not set; using in-memory game store");
            spawn_memory_store(state);
        }
    }
}

fn spawn_memory_store(state: SharedState) {
    let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());
    tokio::spawn(storage_supervisor::run(state, move || {
        let store = store.clone();
        async move { Ok::<_, StorageError>(store) }
    }));
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
