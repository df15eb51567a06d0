//! Prediction history repository: one row per estimator run

use crate::{DbError, DbResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

/// A stored estimator run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PredictionRecord {
    pub id: Option<i64>,
    /// Fingerprint of (symbol, target, days)
    pub request_hash: String,
    pub symbol: String,
    pub source: String,
    pub target_price: f64,
    pub days: i64,
    pub seed: Option<i64>,
    pub success: bool,
    pub message: String,
    pub current_price: f64,
    pub probability: f64,
    pub accuracy: f64,
    pub required_increase: f64,
    /// JSON object, feature name to importance
    pub feature_importances: String,
    pub all_time_high: Option<f64>,
    pub regime: Option<String>,
    pub created_at: Option<i64>,
}

impl PredictionRecord {
    /// Decode the stored importances JSON into a typed value
    pub fn importances_as<T: DeserializeOwned>(&self) -> DbResult<T> {
        Ok(serde_json::from_str(&self.feature_importances)?)
    }

    /// Encode importances for storage
    pub fn encode_importances<T: Serialize>(value: &T) -> DbResult<String> {
        Ok(serde_json::to_string(value)?)
    }
}

/// Repository for stored predictions
pub struct PredictionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PredictionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a run and return its id. `id` and `created_at` on the record are ignored.
    pub async fn save(&self, record: &PredictionRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO predictions (
                request_hash, symbol, source, target_price, days, seed,
                success, message, current_price, probability, accuracy,
                required_increase, feature_importances, all_time_high, regime
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.request_hash)
        .bind(&record.symbol)
        .bind(&record.source)
        .bind(record.target_price)
        .bind(record.days)
        .bind(record.seed)
        .bind(record.success)
        .bind(&record.message)
        .bind(record.current_price)
        .bind(record.probability)
        .bind(record.accuracy)
        .bind(record.required_increase)
        .bind(&record.feature_importances)
        .bind(record.all_time_high)
        .bind(&record.regime)
        .execute(self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, symbol = %record.symbol, "Saved prediction");
        Ok(id)
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<PredictionRecord>> {
        let record = sqlx::query_as::<_, PredictionRecord>("SELECT * FROM predictions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(record)
    }

    /// Newest runs first, optionally for one symbol
    pub async fn get_recent(
        &self,
        limit: i64,
        symbol: Option<&str>,
    ) -> DbResult<Vec<PredictionRecord>> {
        if limit <= 0 {
            return Err(DbError::Query(format!("limit must be positive, got {limit}")));
        }

        let records = match symbol {
            Some(sym) => {
                sqlx::query_as::<_, PredictionRecord>(
                    "SELECT * FROM predictions WHERE symbol = ? ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(sym)
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, PredictionRecord>(
                    "SELECT * FROM predictions ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
        };
        Ok(records)
    }

    /// Most recent run of the same query
    pub async fn latest_for_hash(&self, hash: &str) -> DbResult<Option<PredictionRecord>> {
        let record = sqlx::query_as::<_, PredictionRecord>(
            "SELECT * FROM predictions WHERE request_hash = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(hash)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    /// Returns false when no row had that id
    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM predictions WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM predictions")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use std::collections::BTreeMap;

    fn record(symbol: &str, hash: &str, probability: f64) -> PredictionRecord {
        PredictionRecord {
            id: None,
            request_hash: hash.to_string(),
            symbol: symbol.to_string(),
            source: "binance".to_string(),
            target_price: 120.0,
            days: 10,
            seed: Some(42),
            success: true,
            message: String::new(),
            current_price: 100.0,
            probability,
            accuracy: 0.8,
            required_increase: 0.2,
            feature_importances: r#"{"volatility":0.6,"return":0.4}"#.to_string(),
            all_time_high: Some(150.0),
            regime: Some("recovery".to_string()),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_get_by_id() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.predictions();

        let id = repo.save(&record("BTCUSDT", "h1", 0.35)).await.unwrap();
        let stored = repo.get_by_id(id).await.unwrap().expect("row exists");

        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.symbol, "BTCUSDT");
        assert!(stored.success);
        assert_eq!(stored.probability, 0.35);
        assert_eq!(stored.seed, Some(42));
        assert_eq!(stored.regime.as_deref(), Some("recovery"));
        assert!(stored.created_at.is_some());

        assert!(repo.get_by_id(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_filters_symbol() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.predictions();

        let a = repo.save(&record("BTCUSDT", "h1", 0.1)).await.unwrap();
        let b = repo.save(&record("ETHUSDT", "h2", 0.2)).await.unwrap();
        let c = repo.save(&record("BTCUSDT", "h1", 0.3)).await.unwrap();

        let all = repo.get_recent(10, None).await.unwrap();
        let ids: Vec<i64> = all.iter().filter_map(|r| r.id).collect();
        assert_eq!(ids, vec![c, b, a]);

        let btc = repo.get_recent(10, Some("BTCUSDT")).await.unwrap();
        assert_eq!(btc.len(), 2);
        assert!(btc.iter().all(|r| r.symbol == "BTCUSDT"));

        assert_eq!(repo.get_recent(1, None).await.unwrap().len(), 1);
        assert!(matches!(repo.get_recent(0, None).await, Err(DbError::Query(_))));
    }

    #[tokio::test]
    async fn test_latest_for_hash() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.predictions();

        repo.save(&record("BTCUSDT", "h1", 0.1)).await.unwrap();
        let newest = repo.save(&record("BTCUSDT", "h1", 0.9)).await.unwrap();
        repo.save(&record("BTCUSDT", "other", 0.5)).await.unwrap();

        let latest = repo.latest_for_hash("h1").await.unwrap().unwrap();
        assert_eq!(latest.id, Some(newest));
        assert!(repo.latest_for_hash("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.predictions();

        let id = repo.save(&record("BTCUSDT", "h1", 0.1)).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(repo.delete(id).await.unwrap());
        assert!(!repo.delete(id).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[test]
    fn test_importances_json() {
        let stored = record("BTCUSDT", "h1", 0.1);
        let map: BTreeMap<String, f64> = stored.importances_as().unwrap();
        assert_eq!(map.get("volatility"), Some(&0.6));

        let mut broken = stored.clone();
        broken.feature_importances = "not json".to_string();
        let err = broken.importances_as::<BTreeMap<String, f64>>().unwrap_err();
        assert!(matches!(err, DbError::Serialization(_)));

        let encoded = PredictionRecord::encode_importances(&map).unwrap();
        assert!(encoded.contains("\"return\":0.4"));
    }
}
