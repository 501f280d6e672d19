use anyhow::{Context, Result};
use axum::Router;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

/// Schema for instances and their key-value settings. Idempotent.
const MIGRATION_SQL: &str = include_str!("../migrations/0001_init.sql");

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting s3bucket-repository on {} (downloads in {}, presign ttl {}s)",
        cfg.addr(),
        cfg.download_dir,
        cfg.presign_ttl_secs
    );

    // --- Ensure download directory exists ---
    if !Path::new(&cfg.download_dir).exists() {
        fs::create_dir_all(&cfg.download_dir)
            .with_context(|| format!("creating download directory {}", cfg.download_dir))?;
        tracing::info!("Created download directory at {}", cfg.download_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // SQLx will not create a missing database file on its own.
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if !db_path.contains(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
        if let Err(e) = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(db_path)
        {
            tracing::warn!("Failed to open database file {}: {}", db_path, e);
        }
    }

    let db: Arc<SqlitePool> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core service ---
    let service = services::instance_service::InstanceService::new(
        db.clone(),
        cfg.service_settings(),
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Apply the embedded schema, one statement at a time.
pub(crate) async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(db)
            .await
            .with_context(|| format!("executing migration statement: {}", stmt))?;
    }

    Ok(())
}
