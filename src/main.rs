//! Pulse daemon - scheduled trending sweeps and cache hygiene
//!
//! The request-facing API layer consumes this crate as a library; the daemon
//! only runs the background work: the periodic full recompute of trending
//! scores and the score cache cleanup.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse::{
    config::Args,
    score::{
        spawn_cache_cleanup_task, spawn_sweep_task, MemoryScoreCache, ScoreRefreshService,
        SweepService,
    },
    store::{
        EntityStore, MemoryEntityStore, MemoryRelationshipStore, MongoClient, MongoEntityStore,
        MongoRelationshipStore, RelationshipStore, SystemClock,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pulse={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Pulse - trending sweep daemon");
    info!("======================================");
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Sweep interval: {}s", args.sweep_interval_secs);
    info!("Sweep batch: {} x{}", args.sweep_batch_size, args.sweep_parallelism);
    info!("Score cache TTL: {}s", args.score_cache_ttl_secs);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let (entities, relationships): (Arc<dyn EntityStore>, Arc<dyn RelationshipStore>) =
        match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => {
                info!("MongoDB connected successfully");
                let entities = MongoEntityStore::new(&client).await?;
                let relationships = MongoRelationshipStore::new(&client).await?;
                (Arc::new(entities), Arc::new(relationships))
            }
            Err(e) if args.dev_mode => {
                warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
                (
                    Arc::new(MemoryEntityStore::new()),
                    Arc::new(MemoryRelationshipStore::new()),
                )
            }
            Err(e) => {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        };

    let clock = Arc::new(SystemClock);
    let cache = Arc::new(MemoryScoreCache::new());

    let refresh = Arc::new(ScoreRefreshService::new(
        entities.clone(),
        relationships.clone(),
        cache.clone(),
        clock.clone(),
        args.refresh_config(),
    ));
    let sweep = Arc::new(SweepService::new(
        refresh,
        entities,
        clock,
        args.sweep_config(),
    ));

    let cleanup_handle = spawn_cache_cleanup_task(
        cache,
        std::time::Duration::from_secs(args.cache_cleanup_interval_secs),
    );
    let sweep_handle = spawn_sweep_task(sweep);

    info!("Pulse daemon running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    sweep_handle.abort();
    cleanup_handle.abort();
    Ok(())
}
