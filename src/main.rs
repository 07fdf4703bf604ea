use neonsec_blog::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    repository::{PostgresRepository, RepositoryState},
    storage::{FileStore, FileStoreState, LocalFileStore},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Wires configuration, logging, the database, the file store and the HTTP
/// server. Any failure before the first request is served is fatal.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast: no signing secret, no server)
    dotenv::dotenv().ok();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    // 2. Logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "neonsec_blog=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database (Postgres) and schema migrations
    let postgres = PostgresRepository::connect(&config)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");
    postgres
        .migrate()
        .await
        .expect("FATAL: Failed to apply database migrations.");
    let pool = postgres.pool().clone();
    let repo = Arc::new(postgres) as RepositoryState;

    // 4. File store
    let store = LocalFileStore::new(&config.upload_dir);
    store
        .ensure_layout()
        .await
        .expect("FATAL: Failed to create the upload directories. Check UPLOAD_DIR.");
    tracing::info!("Uploads stored under {}", store.root().display());
    let files = Arc::new(store) as FileStoreState;

    // 5. State, router and server
    let bind_address = config.bind_address;
    let app = create_router(AppState::new(repo, files, config));

    let listener = TcpListener::bind(bind_address)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDRESS.");

    tracing::info!("Listening on {}", bind_address);
    tracing::info!(
        "API Documentation (Swagger UI) available at: http://{}/swagger-ui",
        bind_address
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("FATAL: HTTP server error");

    pool.close().await;
    tracing::info!("Shutdown complete");
}

/// shutdown_signal
///
/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
