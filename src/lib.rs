//! Dota 2 match ingestion: discovers an account's matches on the Steam Web API, fetches them
//! under a shared rate limit, flattens each one into fact rows and commits them to Postgres in
//! idempotent chunks.

pub mod api;
pub mod config;
pub mod database_ops;
pub mod ingest;
pub mod steam;

pub mod util {
    pub mod env;
    pub mod logging;
}

use std::sync::Arc;

use anyhow::Result;

use config::IngestConfig;
use ingest::{AbilityCatalog, FactStore, HttpAbilityFeed, Ingestor};
use steam::{MatchSource, RequestThrottle, SteamClient};

/// Build an `Ingestor` for `store` from the process configuration, talking to the live Steam API.
pub fn build_ingestor(cfg: &IngestConfig, store: Arc<dyn FactStore>) -> Result<Ingestor> {
    let source: Arc<dyn MatchSource> = Arc::new(SteamClient::new(
        &cfg.steam_api_base,
        &cfg.steam_api_key,
        cfg.http_timeout,
    )?);
    let feed = HttpAbilityFeed::new(&cfg.ability_ids_url, cfg.http_timeout)?;
    Ok(Ingestor::new(
        source,
        store,
        RequestThrottle::new(cfg.rate_limit()),
        Arc::new(AbilityCatalog::new(Arc::new(feed))),
        cfg.ingest_settings(),
    ))
}
