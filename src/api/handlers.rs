// HTTP request handlers for the admin endpoints

use std::sync::Arc;
use std::time::Instant;

use actix_web::{web, HttpResponse, Result};
use tracing::{error, info};

use crate::api::models::*;
use crate::database_ops::db::Db;
use crate::ingest::{IngestSummary, Ingestor};

pub const DEFAULT_RECENT_LIMIT: usize = 200;

/// Shared handler state.
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    /// `None` when running against the in-memory store.
    pub db: Option<Db>,
    pub started: Instant,
}

impl AppState {
    pub fn new(ingestor: Arc<Ingestor>, db: Option<Db>) -> Self {
        Self {
            ingestor,
            db,
            started: Instant::now(),
        }
    }
}

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let (healthy, database) = match &state.db {
        Some(db) => match db.ping().await {
            Ok(()) => (true, "connected"),
            Err(err) => {
                error!(error = %err, "health check: database ping failed");
                (false, "disconnected")
            }
        },
        None => (true, "memory"),
    };

    let body = ApiResponse::success(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        database: database.to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
    });
    if healthy {
        Ok(HttpResponse::Ok().json(body))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(body))
    }
}

/// Ingest up to `?limit=` (default 200) of an account's most recent matches.
pub async fn ingest_recent(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<RecentQuery>,
) -> Result<HttpResponse> {
    let account_id = path.into_inner();
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    info!(account_id, limit, "admin: recent ingest requested");
    let result = state.ingestor.ingest_recent(account_id, limit).await;
    Ok(respond(account_id, IngestKind::Recent, result))
}

/// Ingest an account's whole reachable history.
pub async fn ingest_full(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse> {
    let account_id = path.into_inner();
    info!(account_id, "admin: full ingest requested");
    let result = state.ingestor.ingest_full(account_id).await;
    Ok(respond(account_id, IngestKind::Full, result))
}

fn respond(account_id: i64, kind: IngestKind, result: anyhow::Result<IngestSummary>) -> HttpResponse {
    match result {
        Ok(summary) => HttpResponse::Ok().json(ApiResponse::success(IngestResponse {
            inserted: summary.matches_committed,
            account_id,
            kind,
            summary,
        })),
        Err(err) => {
            let message = format!("{err:#}");
            error!(account_id, kind = ?kind, error = %message, "admin ingest failed");
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error(message))
        }
    }
}
