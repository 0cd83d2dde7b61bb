use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use tokio::signal;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};
use tracing::{error, info};
use uuid::Uuid;

use storefront_api as api;

#[derive(Debug, Parser)]
#[command(name = "storefront-api", version, about = "Storefront order and payment service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server and the order expiry worker (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Release expired PENDING orders once and exit
    SweepOnce {
        /// Override the configured order TTL in minutes
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        ttl_minutes: Option<i64>,
    },
    /// Print a bearer token for a user (development only)
    Token {
        #[arg(long, value_parser = clap::value_parser!(Uuid), help = "User identifier")]
        user_id: Uuid,
        #[arg(long, default_value_t = 60)]
        ttl_minutes: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg).await,
        Command::Migrate => {
            let db = api::db::establish_connection_from_app_config(&cfg).await?;
            api::db::run_migrations(&db).await?;
            info!("migrations applied");
            Ok(())
        }
        Command::SweepOnce { ttl_minutes } => {
            let state = build_state(&cfg).await?;
            let ttl = ttl_minutes.unwrap_or(cfg.order_expiry_ttl_minutes);
            let released = state.services.orders.release_expired_orders(ttl).await?;
            info!(released, ttl_minutes = ttl, "sweep finished");
            Ok(())
        }
        Command::Token {
            user_id,
            ttl_minutes,
        } => {
            if cfg.is_production() {
                anyhow::bail!("refusing to mint tokens in production");
            }
            let token = api::auth::JwtKeys::from_secret(&cfg.jwt_secret)
                .issue(user_id, chrono::Duration::minutes(ttl_minutes))?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn build_state(cfg: &api::config::AppConfig) -> anyhow::Result<api::AppState> {
    let db_pool = api::db::establish_connection_from_app_config(cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    let gateway = api::services::StripeGateway::from_config(cfg)
        .context("failed to build payment gateway client")?;

    Ok(api::AppState::new(
        Arc::new(db_pool),
        cfg.clone(),
        Arc::new(gateway),
    ))
}

async fn serve(cfg: api::config::AppConfig) -> anyhow::Result<()> {
    api::handlers::health::init_start_time();
    let state = build_state(&cfg).await?;

    let worker = api::workers::order_expiry::start_worker(
        state.services.orders.clone(),
        api::workers::order_expiry::ExpirySchedule::from(&cfg),
    );

    let mut app = Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .merge(api::api_router(state))
        .layer(TimeoutLayer::new(Duration::from_secs(30)));
    if cfg.is_development() {
        info!("Using permissive CORS in development");
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("storefront-api listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
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
    info!("shutdown signal received");
}
