//! # SQLite InstanceRegistry Implementation
//!
//! This module provides [`SqliteInstanceRegistry`] for durable workflow
//! instance storage using SQLite as the backend.

use approval_engine_core::instance::{
    ClaimId, Decision, WorkflowId, WorkflowInstance, WorkflowState,
};
use approval_engine_core::port::instance_registry::{
    InstanceRegistry, RegistryError, TerminalFields,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Configuration for [`SqliteInstanceRegistry`].
#[derive(Debug, Clone)]
pub struct SqliteRegistryConfig {
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteRegistryConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
        }
    }
}

/// Errors from [`SqliteInstanceRegistry`] operations.
#[derive(Debug, Error)]
pub enum SqliteRegistryError {
    /// Database error.
    #[error("Database error: {0}")]
    Backend(sqlx::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back to a domain record.
    #[error("Invalid stored row: {0}")]
    InvalidRow(String),
}

/// SQLite-backed instance registry.
///
/// The conditional write is a single guarded `UPDATE` on
/// `(id, version, state)`, so the check and the write are one atomic
/// statement; no row is ever half-written and no explicit lock is
/// taken.
///
/// # Examples
///
/// ```ignore
/// use approval_engine_sqlite::SqliteInstanceRegistry;
///
/// let registry = SqliteInstanceRegistry::new("/var/lib/approvals.db").await?;
/// ```
#[derive(Debug, Clone)]
pub struct SqliteInstanceRegistry {
    pool: Arc<SqlitePool>,
}

impl SqliteInstanceRegistry {
    /// Open (creating if missing) a file-backed registry.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, SqliteRegistryError> {
        Self::builder().path(path).build().await
    }

    /// Create an in-memory registry. Useful for testing; the data is
    /// destroyed when the pool is dropped.
    pub async fn in_memory() -> Result<Self, SqliteRegistryError> {
        Self::builder().build().await
    }

    /// Create a new builder.
    pub fn builder() -> SqliteInstanceRegistryBuilder {
        SqliteInstanceRegistryBuilder::new()
    }

    async fn init_pool(
        pool: SqlitePool,
        config: &SqliteRegistryConfig,
    ) -> Result<Self, SqliteRegistryError> {
        sqlx::query(&format!("PRAGMA busy_timeout = {}", config.busy_timeout_ms))
            .execute(&pool)
            .await
            .map_err(SqliteRegistryError::Backend)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(SqliteRegistryError::Migration)?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

/// Builder for [`SqliteInstanceRegistry`].
#[derive(Debug, Default)]
pub struct SqliteInstanceRegistryBuilder {
    path: Option<PathBuf>,
    config: SqliteRegistryConfig,
}

impl SqliteInstanceRegistryBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database file path.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the busy timeout.
    pub fn busy_timeout_ms(mut self, ms: u32) -> Self {
        self.config.busy_timeout_ms = ms;
        self
    }

    /// Build the registry, creating the database file if needed.
    pub async fn build(self) -> Result<SqliteInstanceRegistry, SqliteRegistryError> {
        let pool = match &self.path {
            Some(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                SqlitePool::connect_with(options).await
            }
            // Every pooled connection gets its own private in-memory
            // database: pin a single connection and never recycle it.
            None => SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::new().in_memory(true))
                .await,
        };
        let pool = pool.map_err(SqliteRegistryError::Backend)?;
        SqliteInstanceRegistry::init_pool(pool, &self.config).await
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InstanceRow {
    id: String,
    claim_id: i64,
    state: String,
    created_at: i64,
    deadline_at: i64,
    decision: Option<String>,
    supervisor_id: Option<String>,
    comments: Option<String>,
    version: i64,
    completed_at: Option<i64>,
    propagated_at: Option<i64>,
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, SqliteRegistryError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| SqliteRegistryError::InvalidRow(format!("timestamp out of range: {ms}")))
}

impl InstanceRow {
    fn into_instance(self) -> Result<WorkflowInstance, SqliteRegistryError> {
        let state = WorkflowState::parse(&self.state)
            .ok_or_else(|| SqliteRegistryError::InvalidRow(format!("state: {}", self.state)))?;
        let decision = match self.decision {
            Some(raw) => Some(
                Decision::parse(&raw)
                    .ok_or_else(|| SqliteRegistryError::InvalidRow(format!("decision: {raw}")))?,
            ),
            None => None,
        };
        Ok(WorkflowInstance {
            id: WorkflowId(self.id),
            claim_id: ClaimId(self.claim_id),
            state,
            created_at: millis_to_datetime(self.created_at)?,
            deadline_at: millis_to_datetime(self.deadline_at)?,
            decision,
            supervisor_id: self.supervisor_id,
            comments: self.comments,
            version: self.version as u64,
            completed_at: self.completed_at.map(millis_to_datetime).transpose()?,
            propagated_at: self.propagated_at.map(millis_to_datetime).transpose()?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, claim_id, state, created_at, deadline_at, decision, \
     supervisor_id, comments, version, completed_at, propagated_at";

#[async_trait]
impl InstanceRegistry for SqliteInstanceRegistry {
    type Error = SqliteRegistryError;

    async fn create(&self, instance: &WorkflowInstance) -> Result<(), RegistryError<Self::Error>> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_instances
            (id, claim_id, state, created_at, deadline_at, decision,
             supervisor_id, comments, version, completed_at, propagated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(instance.id.as_str())
        .bind(instance.claim_id.0)
        .bind(instance.state.as_str())
        .bind(instance.created_at.timestamp_millis())
        .bind(instance.deadline_at.timestamp_millis())
        .bind(instance.decision.map(|d| d.as_str()))
        .bind(instance.supervisor_id.as_deref())
        .bind(instance.comments.as_deref())
        .bind(instance.version as i64)
        .bind(instance.completed_at.map(|t| t.timestamp_millis()))
        .bind(instance.propagated_at.map(|t| t.timestamp_millis()))
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RegistryError::already_exists(instance.id.clone()))
            }
            Err(err) => Err(RegistryError::Backend(SqliteRegistryError::Backend(err))),
        }
    }

    async fn load(&self, id: &WorkflowId) -> Result<WorkflowInstance, RegistryError<Self::Error>> {
        let row: Option<InstanceRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_instances WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(SqliteRegistryError::Backend)?;

        match row {
            Some(row) => Ok(row.into_instance()?),
            None => Err(RegistryError::not_found(id.clone())),
        }
    }

    async fn transition(
        &self,
        id: &WorkflowId,
        expected_version: u64,
        fields: &TerminalFields,
    ) -> Result<WorkflowInstance, RegistryError<Self::Error>> {
        // Single guarded UPDATE: the version check and the write are
        // one atomic statement, and the state guard keeps terminal
        // rows immutable even against a matching version.
        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET state = ?, decision = ?, supervisor_id = ?, comments = ?,
                completed_at = ?, version = version + 1
            WHERE id = ? AND version = ? AND state = 'AWAITING_APPROVAL'
            "#,
        )
        .bind(fields.state.as_str())
        .bind(fields.decision.map(|d| d.as_str()))
        .bind(fields.supervisor_id.as_deref())
        .bind(fields.comments.as_deref())
        .bind(fields.completed_at.timestamp_millis())
        .bind(id.as_str())
        .bind(expected_version as i64)
        .execute(&*self.pool)
        .await
        .map_err(SqliteRegistryError::Backend)?;

        if result.rows_affected() == 1 {
            return Ok(self.load(id).await?);
        }

        // Lost: classify against the stored row.
        let current = self.load(id).await?;
        Err(RegistryError::conflict(
            id.clone(),
            expected_version,
            current.version,
        ))
    }

    async fn list_awaiting(&self) -> Result<Vec<WorkflowInstance>, RegistryError<Self::Error>> {
        let rows: Vec<InstanceRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_instances \
             WHERE state = 'AWAITING_APPROVAL' ORDER BY deadline_at ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(SqliteRegistryError::Backend)?;

        rows.into_iter()
            .map(|row| row.into_instance().map_err(RegistryError::Backend))
            .collect()
    }

    async fn list_unpropagated(
        &self,
    ) -> Result<Vec<WorkflowInstance>, RegistryError<Self::Error>> {
        let rows: Vec<InstanceRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_instances \
             WHERE state != 'AWAITING_APPROVAL' AND propagated_at IS NULL \
             ORDER BY completed_at ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(SqliteRegistryError::Backend)?;

        rows.into_iter()
            .map(|row| row.into_instance().map_err(RegistryError::Backend))
            .collect()
    }

    async fn mark_propagated(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError<Self::Error>> {
        // Does not touch version: delivery bookkeeping, not a state
        // write. Idempotent on repeat delivery.
        let result = sqlx::query(
            "UPDATE workflow_instances SET propagated_at = ? \
             WHERE id = ? AND propagated_at IS NULL",
        )
        .bind(at.timestamp_millis())
        .bind(id.as_str())
        .execute(&*self.pool)
        .await
        .map_err(SqliteRegistryError::Backend)?;

        if result.rows_affected() == 0 {
            // Either already propagated (fine) or the row is missing.
            self.load(id).await?;
        }
        Ok(())
    }
}
