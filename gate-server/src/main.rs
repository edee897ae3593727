//! resource-gate server: loads the catalog, applies DDL, serves the gated API over PostgreSQL.
//!
//! Run from repo root: `cargo run -p gate-server`, or
//! `cargo run -p gate-server -- super ops@example.com` to bootstrap the first account.

use clap::{Parser, Subcommand};
use resource_gate::auth::{grant_role, Role};
use resource_gate::{
    app, apply_migrations, ensure_database_exists, load_from_path, scan, AppContext, Catalog, CatalogConfig,
    PgExecutor, Settings,
};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gate-server")]
#[command(about = "Catalog-driven resource API over PostgreSQL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the API (default)
    Serve,
    /// Create an account by email, or move an existing one to a role
    Super {
        email: String,
        /// locked, guest, staff, admin or super
        #[arg(short, long, default_value = "super")]
        role: Role,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resource_gate=info,gate_server=info")),
        )
        .init();

    let (pool, catalog) = prepare(&settings).await?;
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(settings, pool, catalog).await,
        Commands::Super { email, role } => {
            let executor = PgExecutor::new(pool.clone());
            let account = grant_role(&catalog, &executor, &email, role).await;
            pool.close().await;
            let account = account?;
            println!("account {} ({}) now has role {:?}", account.id, account.email, role);
            Ok(())
        }
    }
}

/// Database, pool, DDL and scanned catalog shared by every command.
async fn prepare(settings: &Settings) -> Result<(PgPool, Catalog), Box<dyn std::error::Error>> {
    ensure_database_exists(&settings.database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await?;

    let config = match &settings.catalog_path {
        Some(path) => load_from_path(path).await?,
        None => CatalogConfig::default(),
    }
    .with_builtins();
    apply_migrations(&pool, &config).await?;
    let catalog = scan(&config)?;
    Ok((pool, catalog))
}

async fn serve(settings: Settings, pool: PgPool, catalog: Catalog) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = AppContext::startup(settings.clone(), catalog, Arc::new(PgExecutor::new(pool)))?;
    let listener = TcpListener::bind(settings.listen_addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, prefix = %settings.api_prefix, "listening");
    axum::serve(listener, app(ctx.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    ctx.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed");
    }
    tracing::info!("shutting down");
}
