//! Process configuration resolved from the environment (and `.env`).
use std::time::Duration;

use anyhow::Result;

use crate::ingest::abilities::DEFAULT_ABILITY_IDS_URL;
use crate::ingest::pipeline::DEFAULT_CHUNK_SIZE;
use crate::ingest::{
    DiscoverySettings, FetchRetryPolicy, IngestSettings, ScheduleSettings, WriteRetryPolicy,
};
use crate::steam::{RateLimitSettings, DEFAULT_STEAM_API_BASE};
use crate::util::env::{env_opt, env_parse, env_req};

/// Keys logged (redacted) by the binaries' preflight snapshot.
pub const LOGGED_KEYS: &[&str] = &[
    "STEAM_API_KEY",
    "STEAM_API_BASE",
    "STEAM_RPS",
    "DATABASE_URL",
    "INGEST_CHUNK_SIZE",
    "SCHEDULE_INTERVAL_SECS",
    "API_HOST",
    "API_PORT",
];

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub steam_api_key: String,
    pub steam_api_base: String,
    pub requests_per_second: f64,
    pub http_timeout: Duration,
    pub ability_ids_url: String,
    pub chunk_size: usize,
    pub history_page_delay: Duration,
    pub fetch_max_attempts: u32,
    pub fetch_backoff_base: Duration,
    pub fetch_jitter: Duration,
    pub write_max_attempts: u32,
    pub write_backoff: Duration,
    pub schedule_interval: Duration,
    pub schedule_recent_limit: usize,
    pub schedule_concurrency: usize,
    pub db_max_conns: u32,
    pub api_host: String,
    pub api_port: u16,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            steam_api_key: env_req("STEAM_API_KEY")?,
            steam_api_base: env_opt("STEAM_API_BASE")
                .unwrap_or_else(|| DEFAULT_STEAM_API_BASE.to_string()),
            requests_per_second: env_parse("STEAM_RPS", 1.8),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 30)),
            ability_ids_url: env_opt("ABILITY_IDS_URL")
                .unwrap_or_else(|| DEFAULT_ABILITY_IDS_URL.to_string()),
            chunk_size: env_parse("INGEST_CHUNK_SIZE", DEFAULT_CHUNK_SIZE).max(1),
            history_page_delay: Duration::from_millis(env_parse("HISTORY_PAGE_DELAY_MS", 200)),
            fetch_max_attempts: env_parse("FETCH_MAX_ATTEMPTS", 5u32).max(1),
            fetch_backoff_base: Duration::from_millis(env_parse("FETCH_BACKOFF_BASE_MS", 200)),
            fetch_jitter: Duration::from_millis(env_parse("FETCH_JITTER_MS", 400)),
            write_max_attempts: env_parse("WRITE_MAX_ATTEMPTS", 3u32).max(1),
            write_backoff: Duration::from_millis(env_parse("WRITE_BACKOFF_MS", 500)),
            schedule_interval: Duration::from_secs(env_parse("SCHEDULE_INTERVAL_SECS", 60)),
            schedule_recent_limit: env_parse("SCHEDULE_RECENT_LIMIT", 25usize),
            schedule_concurrency: env_parse("SCHEDULE_CONCURRENCY", 4usize).max(1),
            db_max_conns: env_parse("DB_MAX_CONNS", 10u32),
            api_host: env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            api_port: env_parse("API_PORT", 8080u16),
        })
    }

    pub fn rate_limit(&self) -> RateLimitSettings {
        RateLimitSettings::per_second(self.requests_per_second)
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            chunk_size: self.chunk_size,
            discovery: DiscoverySettings {
                page_delay: self.history_page_delay,
            },
            fetch: FetchRetryPolicy {
                max_attempts: self.fetch_max_attempts,
                base_delay: self.fetch_backoff_base,
                max_jitter: self.fetch_jitter,
            },
            write: WriteRetryPolicy {
                max_attempts: self.write_max_attempts,
                step: self.write_backoff,
            },
        }
    }

    pub fn schedule_settings(&self) -> ScheduleSettings {
        ScheduleSettings {
            interval: self.schedule_interval,
            recent_limit: self.schedule_recent_limit,
            concurrency: self.schedule_concurrency,
        }
    }
}
