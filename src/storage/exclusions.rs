//! Exclusion rule store and in-memory cache
//!
//! Rules are mutated rarely (admin API) but consulted on every parsed
//! product, so reads go through a TTL'd in-memory snapshot grouped by rule
//! kind. Updates become visible within one TTL; the admin handlers also
//! invalidate eagerly after writes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_postgres::Row;

use crate::models::{new_record_id, ExclusionRule, RuleKind};
use crate::storage::repository::ExclusionRepository;

/// PostgreSQL-backed exclusion rule repository
pub struct PostgresExclusionStore {
    pool: Pool,
}

impl PostgresExclusionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn row_to_rule(row: &Row) -> Result<ExclusionRule> {
        let kind_raw: String = row.get("rule_type");
        Ok(ExclusionRule {
            id: row.get("id"),
            kind: RuleKind::parse(&kind_raw)
                .with_context(|| format!("unknown rule_type: {kind_raw}"))?,
            value: row.get("value"),
            reason: row.get("reason"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ExclusionRepository for PostgresExclusionStore {
    async fn list(&self) -> Result<Vec<ExclusionRule>> {
        let client = self.pool.get().await.context("exclusions list: pool")?;
        let rows = client
            .query(
                "SELECT id, rule_type, value, reason, created_at
                 FROM exclusion_rules ORDER BY created_at",
                &[],
            )
            .await
            .context("exclusions list: select")?;
        rows.iter().map(Self::row_to_rule).collect()
    }

    async fn add(
        &self,
        kind: RuleKind,
        value: &str,
        reason: Option<&str>,
    ) -> Result<Option<ExclusionRule>> {
        let client = self.pool.get().await.context("exclusions add: pool")?;
        let id = new_record_id();

        let row = client
            .query_opt(
                "INSERT INTO exclusion_rules (id, rule_type, value, reason)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (rule_type, value) DO NOTHING
                 RETURNING id, rule_type, value, reason, created_at",
                &[&id, &kind.as_str(), &value, &reason],
            )
            .await
            .context("exclusions add: insert")?;

        row.as_ref().map(Self::row_to_rule).transpose()
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let client = self.pool.get().await.context("exclusions remove: pool")?;
        let deleted = client
            .execute("DELETE FROM exclusion_rules WHERE id = $1", &[&id])
            .await
            .context("exclusions remove: delete")?;
        Ok(deleted > 0)
    }
}

/// Exclusion rules grouped by kind, lowercased for matching
#[derive(Debug, Clone, Default)]
pub struct GroupedRules {
    pub countries: HashSet<String>,
    pub categories: HashSet<String>,
    pub suppliers: HashSet<String>,
    pub keywords: HashSet<String>,
}

impl GroupedRules {
    pub fn from_rules(rules: &[ExclusionRule]) -> Self {
        let mut grouped = Self::default();
        for rule in rules {
            let value = rule.value.to_lowercase();
            match rule.kind {
                RuleKind::Country => grouped.countries.insert(value),
                RuleKind::Category => grouped.categories.insert(value),
                RuleKind::Supplier => grouped.suppliers.insert(value),
                RuleKind::Keyword => grouped.keywords.insert(value),
            };
        }
        grouped
    }
}

struct CacheState {
    rules: GroupedRules,
    refreshed_at: Option<Instant>,
}

/// TTL'd snapshot of the exclusion rules.
///
/// This is the only process-wide mutable state outside the database. It is
/// loaded at startup, refreshed lazily on stale reads, and invalidated by the
/// admin handlers after every rule mutation.
pub struct ExclusionCache {
    repo: Arc<dyn ExclusionRepository>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl ExclusionCache {
    pub fn new(repo: Arc<dyn ExclusionRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            state: RwLock::new(CacheState {
                rules: GroupedRules::default(),
                refreshed_at: None,
            }),
        }
    }

    /// Current rule snapshot, refreshing from the store when stale
    pub async fn rules(&self) -> GroupedRules {
        {
            let state = self.state.read().await;
            if let Some(at) = state.refreshed_at {
                if at.elapsed() < self.ttl {
                    return state.rules.clone();
                }
            }
        }

        self.refresh().await
    }

    /// Force a reload from the store
    pub async fn refresh(&self) -> GroupedRules {
        let rules = match self.repo.list().await {
            Ok(rules) => GroupedRules::from_rules(&rules),
            Err(e) => {
                // Keep serving the previous snapshot on store errors
                tracing::warn!(error = %e, "Exclusion rule refresh failed");
                return self.state.read().await.rules.clone();
            }
        };

        let mut state = self.state.write().await;
        state.rules = rules.clone();
        state.refreshed_at = Some(Instant::now());
        rules
    }

    /// Drop the snapshot so the next read reloads
    pub async fn invalidate(&self) {
        self.state.write().await.refreshed_at = None;
    }
}
