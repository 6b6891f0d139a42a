use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use super::models::{parse_history_page, result_matches, MatchPayload, MatchRef};

pub const DEFAULT_STEAM_API_BASE: &str = "https://api.steampowered.com";

const HISTORY_PATH: &str = "/IDOTA2Match_570/GetMatchHistory/V001/";
const BY_SEQ_PATH: &str = "/IDOTA2Match_570/GetMatchHistoryBySequenceNum/V001/";

#[derive(Error, Debug)]
pub enum SteamError {
    #[error("throttled by upstream (429)")]
    Throttled,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network: {0}")]
    Net(#[from] reqwest::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl SteamError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, SteamError::Throttled)
    }
}

/// Upstream match endpoints the ingestion core depends on.
#[async_trait]
pub trait MatchSource: Send + Sync {
    /// One page of an account's history, newest first. `start_at_match_id = None` means
    /// "most recent".
    async fn match_history(
        &self,
        account_id: i64,
        matches_requested: u32,
        start_at_match_id: Option<i64>,
    ) -> Result<Vec<MatchRef>, SteamError>;

    /// Zero or one full payload starting at the given sequence number.
    async fn match_by_seq(&self, match_seq_num: i64) -> Result<Option<MatchPayload>, SteamError>;
}

#[derive(Clone)]
pub struct SteamClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl SteamClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, SteamError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dota-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, SteamError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SteamError::Throttled);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            let sample = body.chars().take(200).collect::<String>();
            return Err(SteamError::Http {
                status: status.as_u16(),
                body: sample,
            });
        }
        Ok(serde_json::from_str::<Value>(body.trim())?)
    }
}

#[async_trait]
impl MatchSource for SteamClient {
    #[instrument(skip(self))]
    async fn match_history(
        &self,
        account_id: i64,
        matches_requested: u32,
        start_at_match_id: Option<i64>,
    ) -> Result<Vec<MatchRef>, SteamError> {
        let mut query = vec![
            ("account_id", account_id.to_string()),
            ("matches_requested", matches_requested.to_string()),
        ];
        if let Some(start) = start_at_match_id {
            query.push(("start_at_match_id", start.to_string()));
        }
        let body = self.get_json(HISTORY_PATH, &query).await?;
        let refs = parse_history_page(&body);
        debug!(returned = refs.len(), "steam history page");
        Ok(refs)
    }

    #[instrument(skip(self))]
    async fn match_by_seq(&self, match_seq_num: i64) -> Result<Option<MatchPayload>, SteamError> {
        let query = [
            ("start_at_match_seq_num", match_seq_num.to_string()),
            ("matches_requested", "1".to_string()),
        ];
        let body = self.get_json(BY_SEQ_PATH, &query).await?;
        Ok(result_matches(&body).first().map(MatchPayload::from_value))
    }
}
