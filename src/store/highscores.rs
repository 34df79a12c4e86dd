//! Highscore collaborator: REST backend and in-memory fallback

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Table the REST backend stores scores in
const HIGHSCORE_TABLE: &str = "highscores";

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighscoreEntry {
    pub name: String,
    pub score: u64,
    #[serde(default)]
    pub kills: u32,
    #[serde(default)]
    pub waves_reached: u32,
    /// Whole seconds from match start to the last death
    #[serde(default)]
    pub survival_secs: u64,
    pub recorded_at: DateTime<Utc>,
}

impl HighscoreEntry {
    pub fn new(name: impl Into<String>, score: u64) -> Self {
        Self {
            name: name.into(),
            score,
            kills: 0,
            waves_reached: 0,
            survival_secs: 0,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_stats(mut self, kills: u32, waves_reached: u32, survival_secs: u64) -> Self {
        self.kills = kills;
        self.waves_reached = waves_reached;
        self.survival_secs = survival_secs;
        self
    }
}

/// Submit/fetch contract of the external highscore backend
pub trait HighscoreStore: Send + Sync {
    fn submit_score(&self, entry: HighscoreEntry) -> BoxFuture<'_, Result<(), HighscoreError>>;

    /// Best scores first, at most `limit`
    fn fetch_scores(&self, limit: usize) -> BoxFuture<'_, Result<Vec<HighscoreEntry>, HighscoreError>>;
}

/// Fire-and-forget submission; failures are logged and dropped
pub fn submit_in_background(store: Arc<dyn HighscoreStore>, entry: HighscoreEntry) {
    tokio::spawn(async move {
        let team = entry.name.clone();
        let score = entry.score;
        match store.submit_score(entry).await {
            Ok(()) => info!(team = %team, score, "Highscore submitted"),
            Err(e) => warn!(team = %team, score, error = %e, "Highscore submission failed"),
        }
    });
}

/// PostgREST-style highscore backend
#[derive(Clone)]
pub struct RestHighscoreStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestHighscoreStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn rest_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, HIGHSCORE_TABLE)
    }

    async fn insert(&self, entry: &HighscoreEntry) -> Result<(), HighscoreError> {
        let response = self
            .client
            .post(self.rest_url())
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(entry)
            .send()
            .await
            .map_err(HighscoreError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HighscoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn top(&self, limit: usize) -> Result<Vec<HighscoreEntry>, HighscoreError> {
        let url = format!(
            "{}?select=name,score,kills,waves_reached,survival_secs,recorded_at&order=score.desc&limit={}",
            self.rest_url(),
            limit
        );

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(HighscoreError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HighscoreError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(HighscoreError::Parse)
    }
}

impl HighscoreStore for RestHighscoreStore {
    fn submit_score(&self, entry: HighscoreEntry) -> BoxFuture<'_, Result<(), HighscoreError>> {
        Box::pin(async move { self.insert(&entry).await })
    }

    fn fetch_scores(&self, limit: usize) -> BoxFuture<'_, Result<Vec<HighscoreEntry>, HighscoreError>> {
        Box::pin(self.top(limit))
    }
}

/// Process-local leaderboard used when no backend is configured
#[derive(Default)]
pub struct MemoryHighscoreStore {
    entries: Mutex<Vec<HighscoreEntry>>,
}

impl MemoryHighscoreStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HighscoreStore for MemoryHighscoreStore {
    fn submit_score(&self, entry: HighscoreEntry) -> BoxFuture<'_, Result<(), HighscoreError>> {
        let mut entries = self.entries.lock();
        // Stable: equal scores keep submission order
        let at = entries.partition_point(|e| e.score >= entry.score);
        entries.insert(at, entry);
        Box::pin(async { Ok(()) })
    }

    fn fetch_scores(&self, limit: usize) -> BoxFuture<'_, Result<Vec<HighscoreEntry>, HighscoreError>> {
        let top = self.entries.lock().iter().take(limit).cloned().collect();
        Box::pin(async move { Ok(top) })
    }
}

/// Highscore backend errors
#[derive(Debug, thiserror::Error)]
pub enum HighscoreError {
    #[error("Request failed: {0}")]
    Request(reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_orders_best_first() {
        let store = MemoryHighscoreStore::new();
        tokio_test::block_on(async {
            store.submit_score(HighscoreEntry::new("A & B", 120)).await.expect("submit");
            store.submit_score(HighscoreEntry::new("C & D", 300)).await.expect("submit");
            store.submit_score(HighscoreEntry::new("E & F", 120)).await.expect("submit");

            let top = store.fetch_scores(10).await.expect("fetch");
            let names: Vec<&str> = top.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names, vec!["C & D", "A & B", "E & F"]);

            let limited = store.fetch_scores(1).await.expect("fetch");
            assert_eq!(limited.len(), 1);
            assert_eq!(limited[0].score, 300);
        });
    }

    #[test]
    fn test_rest_url_trims_trailing_slash() {
        let store = RestHighscoreStore::new("https://scores.example.com/", "key");
        assert_eq!(store.rest_url(), "https://scores.example.com/rest/v1/highscores");
    }

    #[test]
    fn test_entry_serializes_match_stats() {
        let entry = HighscoreEntry::new("Ada & Grace", 70).with_stats(7, 3, 95);
        let json = serde_json::to_value(&entry).expect("serializes");
        assert_eq!(json["score"], 70);
        assert_eq!(json["kills"], 7);
        assert_eq!(json["waves_reached"], 3);
        assert_eq!(json["survival_secs"], 95);
        assert!(json["recorded_at"].is_string());
    }

    #[test]
    fn test_rows_without_stats_still_parse() {
        let row = r#"{"name":"A & B","score":40,"recorded_at":"2026-01-01T00:00:00Z"}"#;
        let entry: HighscoreEntry = serde_json::from_str(row).expect("parses");
        assert_eq!(entry.kills, 0);
        assert_eq!(entry.survival_secs, 0);
    }
}
