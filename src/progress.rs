use async_trait::async_trait;
use catalog_types::Stage;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio_rusqlite::Connection;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub basic: usize,
    pub attributes: usize,
    pub images: usize,
    pub tagged: usize,
}

impl ProgressSummary {
    fn add(&mut self, stage: Stage, count: usize) {
        match stage {
            Stage::Basic => self.basic += count,
            Stage::Attributes => self.attributes += count,
            Stage::Images => self.images += count,
        }
    }
}

/// Persistent per-sku, per-stage completion flags.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn is_done(&self, sku: &str, stage: Stage) -> anyhow::Result<bool>;
    async fn mark_done(&self, sku: &str, stage: Stage, supplier: Option<&str>) -> anyhow::Result<()>;
    async fn supplier_of(&self, sku: &str) -> anyhow::Result<Option<String>>;
    async fn reset_all(&self) -> anyhow::Result<()>;
    async fn summary(&self) -> anyhow::Result<ProgressSummary>;
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    flags: RwLock<HashSet<(String, Stage)>>,
    suppliers: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn is_done(&self, sku: &str, stage: Stage) -> anyhow::Result<bool> {
        Ok(self.flags.read().await.contains(&(sku.to_string(), stage)))
    }

    async fn mark_done(&self, sku: &str, stage: Stage, supplier: Option<&str>) -> anyhow::Result<()> {
        self.flags.write().await.insert((sku.to_string(), stage));
        if let Some(supplier) = supplier {
            self.suppliers
                .write()
                .await
                .insert(sku.to_string(), supplier.to_string());
        }
        Ok(())
    }

    async fn supplier_of(&self, sku: &str) -> anyhow::Result<Option<String>> {
        Ok(self.suppliers.read().await.get(sku).cloned())
    }

    async fn reset_all(&self) -> anyhow::Result<()> {
        self.flags.write().await.clear();
        self.suppliers.write().await.clear();
        Ok(())
    }

    async fn summary(&self) -> anyhow::Result<ProgressSummary> {
        let mut summary = ProgressSummary::default();
        for (_, stage) in self.flags.read().await.iter() {
            summary.add(*stage, 1);
        }
        summary.tagged = self.suppliers.read().await.len();
        Ok(summary)
    }
}

pub struct SqliteProgressStore {
    conn: Connection,
}

impl SqliteProgressStore {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            let _ = conn.pragma_update(None, "journal_mode", &"WAL");
            let _ = conn.pragma_update(None, "synchronous", &"NORMAL");
            let _ = conn.pragma_update(None, "busy_timeout", &5000i64);
            let conn = Transaction::new(conn, TransactionBehavior::Deferred)?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS import_progress (
                    sku TEXT NOT NULL,
                    stage INTEGER NOT NULL,
                    done_at TEXT NOT NULL,
                    PRIMARY KEY (sku, stage)
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS import_supplier (
                    sku TEXT PRIMARY KEY,
                    supplier TEXT NOT NULL
                )",
                [],
            )?;
            conn.commit()?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn is_done(&self, sku: &str, stage: Stage) -> anyhow::Result<bool> {
        let sku = sku.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT 1 FROM import_progress WHERE sku = ?1 AND stage = ?2")?;
                let exists = stmt.exists(params![sku, stage.number()])?;
                Ok(exists)
            })
            .await?)
    }

    async fn mark_done(&self, sku: &str, stage: Stage, supplier: Option<&str>) -> anyhow::Result<()> {
        let sku = sku.to_string();
        let supplier = supplier.map(ToString::to_string);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR REPLACE INTO import_progress (sku, stage, done_at) VALUES (?1, ?2, ?3)",
                    params![sku, stage.number(), OffsetDateTime::now_utc()],
                )?;
                if let Some(supplier) = supplier {
                    tx.execute(
                        "INSERT OR REPLACE INTO import_supplier (sku, supplier) VALUES (?1, ?2)",
                        params![sku, supplier],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn supplier_of(&self, sku: &str) -> anyhow::Result<Option<String>> {
        let sku = sku.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let supplier = conn
                    .query_row(
                        "SELECT supplier FROM import_supplier WHERE sku = ?1",
                        [sku],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(supplier)
            })
            .await?)
    }

    async fn reset_all(&self) -> anyhow::Result<()> {
        self.conn
            .call(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM import_progress", [])?;
                tx.execute("DELETE FROM import_supplier", [])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        log::info!("Import progress reset");
        Ok(())
    }

    async fn summary(&self) -> anyhow::Result<ProgressSummary> {
        Ok(self
            .conn
            .call(|conn| {
                let mut summary = ProgressSummary::default();
                let mut stmt =
                    conn.prepare("SELECT stage, COUNT(*) FROM import_progress GROUP BY stage")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, u8>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                for (stage, count) in rows {
                    match Stage::try_from(stage) {
                        Ok(stage) => summary.add(stage, count.max(0) as usize),
                        Err(n) => log::warn!("Unknown stage {n} in import progress"),
                    }
                }
                let tagged: i64 =
                    conn.query_row("SELECT COUNT(*) FROM import_supplier", [], |row| row.get(0))?;
                summary.tagged = tagged.max(0) as usize;
                Ok(summary)
            })
            .await?)
    }
}
