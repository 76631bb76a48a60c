use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    Condition, DEFAULT_MAX_BATCH_SIZE, Item, ItemStore, Result, StoreError, Version, WriteItem,
    validate_batch,
};

/// PostgreSQL-backed item store implementation.
///
/// Each batch runs in one SQL transaction. Rows touched by a conditional write
/// are locked with `FOR UPDATE` before their condition is evaluated; creates
/// guarded by `NotExists` use a conditional upsert so two racing inserts of
/// the same key cannot both succeed.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    max_batch_size: usize,
}

impl PostgresStore {
    /// Creates a new PostgreSQL item store with the default batch cap.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    /// Overrides the batch cap.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_item(row: PgRow) -> Result<Item> {
        Ok(Item {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            version: Version::new(row.try_get("version")?),
            expires_at: row.try_get::<Option<DateTime<Utc>>, _>("expires_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn lock_current(
        tx: &mut Transaction<'_, Postgres>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Item>> {
        let row = sqlx::query(
            r#"
            SELECT key, value, version, expires_at, updated_at
            FROM items
            WHERE key = $1
            FOR UPDATE
            "#,
        )
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => {
                let item = Self::row_to_item(row)?;
                Ok((!item.is_expired_at(now)).then_some(item))
            }
            None => Ok(None),
        }
    }

    async fn insert_if_free(
        tx: &mut Transaction<'_, Postgres>,
        item: &Item,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // Only an expired row may be overwritten
        let result = sqlx::query(
            r#"
            INSERT INTO items (key, value, version, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                version = EXCLUDED.version,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
            WHERE items.expires_at IS NOT NULL AND items.expires_at <= $5
            "#,
        )
        .bind(&item.key)
        .bind(&item.value)
        .bind(item.version.as_i64())
        .bind(item.expires_at)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn upsert(
        tx: &mut Transaction<'_, Postgres>,
        item: &Item,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (key, value, version, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                version = EXCLUDED.version,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&item.key)
        .bind(&item.value)
        .bind(item.version.as_i64())
        .bind(item.expires_at)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ItemStore for PostgresStore {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn transact_write(&self, writes: Vec<WriteItem>) -> Result<()> {
        validate_batch(&writes, self.max_batch_size)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Dropping `tx` on an early return rolls the whole batch back
        for write in &writes {
            match write {
                WriteItem::Put {
                    item,
                    condition: Condition::NotExists,
                } => {
                    if !Self::insert_if_free(&mut tx, item, now).await? {
                        return Err(StoreError::ConditionFailed {
                            key: item.key.clone(),
                        });
                    }
                }
                WriteItem::Put { item, condition } => {
                    if *condition != Condition::None {
                        let current = Self::lock_current(&mut tx, &item.key, now).await?;
                        if !condition.is_satisfied_by(current.as_ref()) {
                            return Err(StoreError::ConditionFailed {
                                key: item.key.clone(),
                            });
                        }
                    }
                    Self::upsert(&mut tx, item, now).await?;
                }
                WriteItem::Delete { key, condition } => {
                    if *condition != Condition::None {
                        let current = Self::lock_current(&mut tx, key, now).await?;
                        if !condition.is_satisfied_by(current.as_ref()) {
                            return Err(StoreError::ConditionFailed { key: key.clone() });
                        }
                    }
                    sqlx::query("DELETE FROM items WHERE key = $1")
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Item>> {
        let row = sqlx::query(
            r#"
            SELECT key, value, version, expires_at, updated_at
            FROM items
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn query_prefix(&self, prefix: &str) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT key, value, version, expires_at, updated_at
            FROM items
            WHERE starts_with(key, $1) AND (expires_at IS NULL OR expires_at > NOW())
            ORDER BY key ASC
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }
}
