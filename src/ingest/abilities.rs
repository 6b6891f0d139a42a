use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{error, info};

pub const DEFAULT_ABILITY_IDS_URL: &str =
    "https://raw.githubusercontent.com/odota/dotaconstants/master/build/ability_ids.json";

/// Best-effort source of the numeric ability id -> canonical name table.
#[async_trait]
pub trait AbilityFeed: Send + Sync {
    async fn load(&self) -> Result<HashMap<i32, String>>;
}

pub struct HttpAbilityFeed {
    http: Client,
    url: String,
}

impl HttpAbilityFeed {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build ability feed http client")?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AbilityFeed for HttpAbilityFeed {
    async fn load(&self) -> Result<HashMap<i32, String>> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("ability feed request failed")?
            .error_for_status()
            .context("ability feed returned error status")?;
        let body: Value = resp.json().await.context("ability feed body is not json")?;
        parse_ability_ids(&body)
    }
}

/// Decode `{"5003": "antimage_mana_break", ...}`; non-numeric keys and non-string values are
/// dropped.
pub fn parse_ability_ids(body: &Value) -> Result<HashMap<i32, String>> {
    let obj = body
        .as_object()
        .context("ability feed payload is not a json object")?;
    let mut out = HashMap::with_capacity(obj.len());
    for (k, v) in obj {
        let (Ok(id), Some(name)) = (k.trim().parse::<i32>(), v.as_str()) else {
            continue;
        };
        out.insert(id, name.to_string());
    }
    Ok(out)
}

/// Immutable id -> name table; once built it is read without locking.
#[derive(Debug, Default)]
pub struct AbilityTable {
    names: HashMap<i32, String>,
}

impl AbilityTable {
    pub fn new(names: HashMap<i32, String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Canonical name, or the synthetic `id_<N>` when the id is unknown.
    pub fn resolve(&self, ability_id: i32) -> String {
        self.names
            .get(&ability_id)
            .cloned()
            .unwrap_or_else(|| synthetic_name(ability_id))
    }
}

pub fn synthetic_name(ability_id: i32) -> String {
    format!("id_{ability_id}")
}

/// Lazily populated, process-lifetime ability resolver.
///
/// The first caller triggers exactly one feed load even under concurrent first use; every
/// later call shares the same table. A failed load degrades to an empty table (all ids get
/// synthetic names) and is never retried for the life of the catalog.
pub struct AbilityCatalog {
    feed: Arc<dyn AbilityFeed>,
    table: OnceCell<Arc<AbilityTable>>,
}

impl AbilityCatalog {
    pub fn new(feed: Arc<dyn AbilityFeed>) -> Self {
        Self {
            feed,
            table: OnceCell::new(),
        }
    }

    /// Catalog that is already populated; no feed is ever consulted.
    pub fn preloaded(names: HashMap<i32, String>) -> Self {
        Self {
            feed: Arc::new(NoFeed),
            table: OnceCell::new_with(Some(Arc::new(AbilityTable::new(names)))),
        }
    }

    pub async fn table(&self) -> Arc<AbilityTable> {
        self.table
            .get_or_init(|| async {
                match self.feed.load().await {
                    Ok(names) => {
                        info!(abilities = names.len(), "ability table loaded");
                        Arc::new(AbilityTable::new(names))
                    }
                    Err(err) => {
                        error!(error = ?err, "cannot load ability ids; falling back to numeric names");
                        Arc::new(AbilityTable::default())
                    }
                }
            })
            .await
            .clone()
    }

    pub async fn resolve(&self, ability_id: i32) -> String {
        self.table().await.resolve(ability_id)
    }
}

struct NoFeed;

#[async_trait]
impl AbilityFeed for NoFeed {
    async fn load(&self) -> Result<HashMap<i32, String>> {
        Ok(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFeed {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AbilityFeed for CountingFeed {
        async fn load(&self) -> Result<HashMap<i32, String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                anyhow::bail!("feed offline");
            }
            Ok(HashMap::from([(5003, "antimage_mana_break".to_string())]))
        }
    }

    #[test]
    fn parses_feed_and_skips_garbage_keys() {
        let table = parse_ability_ids(&json!({
            "5003": "antimage_mana_break",
            "abc": "ignored",
            "5004": 12
        }))
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[&5003], "antimage_mana_break");
        assert!(parse_ability_ids(&json!([1, 2])).is_err());
    }

    #[tokio::test]
    async fn concurrent_first_use_loads_once() {
        let feed = Arc::new(CountingFeed {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let catalog = Arc::new(AbilityCatalog::new(feed.clone()));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let c = catalog.clone();
            tasks.push(tokio::spawn(async move { c.resolve(5003).await }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap(), "antimage_mana_break");
        }
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.resolve(1).await, "id_1");
    }

    #[tokio::test]
    async fn failed_feed_degrades_to_synthetic_names() {
        let feed = Arc::new(CountingFeed {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let catalog = AbilityCatalog::new(feed.clone());
        assert_eq!(catalog.resolve(5003).await, "id_5003");
        assert!(catalog.table().await.is_empty());
        // No second attempt after degradation.
        assert_eq!(catalog.resolve(5003).await, "id_5003");
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }
}
