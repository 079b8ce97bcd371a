/// Cursor Store Module
///
/// Durable key/value progress markers. Each dataset keeps the last period it fully ingested
/// under `loaded_month_<dataset>`; the run additionally records the last resolved period and
/// its listing URL under two global keys.
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::datasets::Dataset;
use crate::error::{Error, Result};
use crate::models::Period;

/// Table holding the cursors
pub const META_TABLE: &str = "rfcnpj_meta";

/// Prefix of per-dataset cursor keys, and the global key of the last loaded period
pub const LOADED_MONTH_KEY: &str = "loaded_month";

/// Global key of the listing URL of the last loaded period
pub const LOADED_URL_KEY: &str = "loaded_url";

pub fn cursor_key(dataset: &str) -> String {
    format!("{}_{}", LOADED_MONTH_KEY, dataset)
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite every entry. Either all of them are stored or none is.
    async fn set_all(&self, entries: &[(String, String)]) -> Result<()>;
}

/// Cursor store backed by the `rfcnpj_meta` table
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the meta table if it does not exist
    pub async fn ensure(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            META_TABLE
        ))
        .execute(&self.pool)
        .await?;

        tracing::debug!(table = META_TABLE, "cursor table ready");
        Ok(())
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(&format!("SELECT value FROM {} WHERE key = $1", META_TABLE))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn set_all(&self, entries: &[(String, String)]) -> Result<()> {
        let upsert = format!(
            r#"
            INSERT INTO {} (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key)
            DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = now()
            "#,
            META_TABLE
        );

        // Dropping the transaction on error rolls every upsert back.
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(&upsert).bind(key).bind(value).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(())
    }
}

/// Read the cursor of every given dataset. Datasets never loaded are absent from the map.
pub async fn load_cursors(
    store: &dyn CursorStore,
    datasets: &[&'static Dataset],
) -> Result<BTreeMap<&'static str, Period>> {
    let mut cursors = BTreeMap::new();

    for dataset in datasets {
        let key = cursor_key(dataset.name);
        if let Some(value) = store.get(&key).await? {
            let period = value
                .parse::<Period>()
                .map_err(|e| Error::config(format!("stored cursor {} = {:?} is invalid: {}", key, value, e)))?;
            cursors.insert(dataset.name, period);
        }
    }

    Ok(cursors)
}

/// Advance the cursor of every due dataset to `period` and record the run's globals.
///
/// All keys are written in one batch, so a failed write leaves every cursor as it was.
/// A cursor is never moved backwards, so forcing an older period leaves newer cursors alone.
pub async fn advance_cursors(
    store: &dyn CursorStore,
    period: Period,
    listing_url: &str,
    due: &[&'static Dataset],
) -> Result<()> {
    let value = period.to_string();
    let mut entries = Vec::with_capacity(due.len() + 2);
    let mut advanced = Vec::with_capacity(due.len());

    for dataset in due {
        let key = cursor_key(dataset.name);
        let current = store.get(&key).await?.and_then(|v| v.parse::<Period>().ok());
        if let Some(current) = current.filter(|c| *c >= period) {
            tracing::info!(
                dataset = dataset.name,
                cursor = %current,
                period = %period,
                "cursor already ahead, leaving it"
            );
            continue;
        }

        entries.push((key, value.clone()));
        advanced.push(dataset.name);
    }

    entries.push((LOADED_MONTH_KEY.to_string(), value.clone()));
    entries.push((LOADED_URL_KEY.to_string(), listing_url.to_string()));
    store.set_all(&entries).await?;

    for dataset in advanced {
        tracing::info!(dataset, period = %period, "cursor advanced");
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryCursorStore;
    use super::*;
    use crate::datasets::find;

    fn datasets(names: &[&str]) -> Vec<&'static Dataset> {
        names.iter().map(|n| find(n).unwrap()).collect()
    }

    #[test]
    fn test_cursor_key() {
        assert_eq!(cursor_key("simples"), "loaded_month_simples");
    }

    #[tokio::test]
    async fn test_load_cursors_skips_missing() {
        let store = MemoryCursorStore::with(&[("loaded_month_simples", "2025-07")]);

        let cursors = load_cursors(&store, &datasets(&["simples", "moti"])).await.unwrap();

        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors["simples"].to_string(), "2025-07");
    }

    #[tokio::test]
    async fn test_load_cursors_rejects_garbage() {
        let store = MemoryCursorStore::with(&[("loaded_month_moti", "july")]);

        let err = load_cursors(&store, &datasets(&["moti"])).await.unwrap_err();

        assert!(matches!(err, Error::Config(ref msg) if msg.contains("loaded_month_moti")));
    }

    #[tokio::test]
    async fn test_advance_cursors_writes_due_and_globals() {
        let store = MemoryCursorStore::with(&[("loaded_month_quals", "2025-06")]);
        let period: Period = "2025-08".parse().unwrap();

        advance_cursors(&store, period, "https://example.com/dav/2025-08", &datasets(&["simples", "quals"]))
            .await
            .unwrap();

        assert_eq!(store.value("loaded_month_simples").as_deref(), Some("2025-08"));
        assert_eq!(store.value("loaded_month_quals").as_deref(), Some("2025-08"));
        assert_eq!(store.value(LOADED_MONTH_KEY).as_deref(), Some("2025-08"));
        assert_eq!(store.value(LOADED_URL_KEY).as_deref(), Some("https://example.com/dav/2025-08"));
    }

    #[tokio::test]
    async fn test_advance_cursors_never_moves_backwards() {
        let store = MemoryCursorStore::with(&[("loaded_month_simples", "2025-10")]);
        let period: Period = "2025-08".parse().unwrap();

        advance_cursors(&store, period, "url", &datasets(&["simples"])).await.unwrap();

        assert_eq!(store.value("loaded_month_simples").as_deref(), Some("2025-10"));
    }

    #[tokio::test]
    async fn test_failed_write_advances_no_cursor() {
        let mut store = MemoryCursorStore::with(&[("loaded_month_quals", "2025-07")]);
        store.fail_on = Some(LOADED_URL_KEY.to_string());
        let period: Period = "2025-08".parse().unwrap();

        let result = advance_cursors(&store, period, "url", &datasets(&["moti", "quals"])).await;

        assert!(matches!(result, Err(Error::Database(_))));
        assert!(store.value("loaded_month_moti").is_none());
        assert_eq!(store.value("loaded_month_quals").as_deref(), Some("2025-07"));
        assert!(store.value(LOADED_MONTH_KEY).is_none());
        assert_eq!(store.write_count(), 0);
    }
}
