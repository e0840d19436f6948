//! PredPool - Epoch Prediction Market Backend
//! Mission: Stake-weighted consensus with subscription-gated reads
//!
//! Staked forecasters submit binary predictions for future epochs, a
//! trusted resolver publishes ground truth, and subscribers buy
//! time-boxed access to the aggregated market view.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use predpool_backend::{
    api,
    market::{InMemoryStakeLedger, MarketDb, PredictionMarket},
    models::Config,
};

#[derive(Parser, Debug)]
#[command(name = "predpool", about = "Epoch prediction market server")]
struct Args {
    /// Override the SQLite database path
    #[arg(long)]
    db: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("load configuration")?;
    if let Some(db) = args.db {
        config.database_path = db;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!("🔮 PredPool backend starting");
    info!(
        "epoch duration {}s, subscription {}s, trueval timeout {}s",
        config.epoch_duration, config.subscription_duration, config.trueval_timeout
    );
    info!(
        "resolver: {}, fee collector: {}",
        config.resolver, config.fee_collector
    );

    let db = MarketDb::new(&config.database_path).context("open market database")?;
    let ledger = Arc::new(InMemoryStakeLedger::new());
    let market = Arc::new(PredictionMarket::restore(&config, db, ledger.clone()).await?);

    let app = api::create_router(market, ledger)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    info!("listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
