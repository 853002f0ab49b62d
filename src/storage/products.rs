//! Scored-product store: dedup index and scoring hand-off
//!
//! Parsed products land in `scored_products`, which the scoring stage reads
//! downstream. Its unique `source_product_id` makes the table double as the
//! crawl-side deduplication index: a batch lookup filters discovered URLs,
//! and the insert's `ON CONFLICT DO NOTHING` absorbs the races a stale read
//! lets through.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::collections::HashSet;

use crate::models::{new_record_id, ProductRecord};
use crate::storage::repository::{ProductRepository, StoreOutcome};

/// PostgreSQL-backed scored-product repository
pub struct PostgresProductStore {
    pool: Pool,
}

impl PostgresProductStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PostgresProductStore {
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let client = self.pool.get().await.context("products existing: pool")?;
        let rows = client
            .query(
                "SELECT source_product_id FROM scored_products
                 WHERE source_product_id = ANY($1)",
                &[&ids],
            )
            .await
            .context("products existing: select")?;

        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn store(
        &self,
        job_id: &str,
        record: &ProductRecord,
        source_url: &str,
    ) -> Result<StoreOutcome> {
        let client = self.pool.get().await.context("products store: pool")?;
        let id = new_record_id();
        let data = serde_json::to_value(record).context("products store: serialize")?;

        let inserted = client
            .execute(
                "INSERT INTO scored_products
                     (id, source_product_id, crawl_job_id, name, source_url, data)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (source_product_id) DO NOTHING",
                &[&id, &record.id, &job_id, &record.name, &source_url, &data],
            )
            .await
            .context("products store: insert")?;

        if inserted == 0 {
            Ok(StoreOutcome::Duplicate)
        } else {
            Ok(StoreOutcome::Stored)
        }
    }
}
