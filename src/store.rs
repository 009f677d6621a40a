//! Route Store — durable, unique-by-path Route records in SQLite.
//!
//! The table is created with `CREATE TABLE IF NOT EXISTS` at pool
//! construction; there is no separate migration runner. SQLite was chosen
//! over a server-based RDBMS because the gateway owns this schema outright
//! and a file-backed store needs no extra deployment unit, the same
//! reasoning the teacher applies to its file-backed TOML config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

/// A rule mapping an incoming path prefix to a downstream base URL, with
/// optional rate-limit parameters.
///
/// Invariants: `path` is unique across the store; `capacity` and
/// `refill_rate_per_second` are both `None` or both `Some`; `updated_at ≥
/// created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Route {
    pub id: i64,
    pub path: String,
    pub target_url: String,
    pub capacity: Option<i64>,
    pub refill_rate_per_second: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a new route. `path` and `target_url` are
/// required; rate-limit parameters are optional but must be supplied
/// together.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRoute {
    pub path: String,
    pub target_url: String,
    pub capacity: Option<i64>,
    pub refill_rate_per_second: Option<i64>,
}

impl NewRoute {
    /// `(capacity, refill_rate_per_second)` must both be present or both
    /// absent, and any present value must be strictly positive.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_route_fields(&self.path, &self.target_url, self.capacity, self.refill_rate_per_second)
    }
}

/// Shared by [`NewRoute::validate`] (insert) and [`RouteStore::update`]
/// (applied to the merged result of a partial update) so both paths enforce
/// the same §3 invariants: non-empty `path`/`target_url`, and
/// `capacity`/`refill_rate_per_second` both present or both absent, each
/// strictly positive when present.
fn validate_route_fields(
    path: &str,
    target_url: &str,
    capacity: Option<i64>,
    refill_rate_per_second: Option<i64>,
) -> anyhow::Result<()> {
    anyhow::ensure!(!path.is_empty(), "path must not be empty");
    anyhow::ensure!(!target_url.is_empty(), "target_url must not be empty");
    anyhow::ensure!(
        capacity.is_some() == refill_rate_per_second.is_some(),
        "capacity and refill_rate_per_second must both be set or both be null"
    );
    if let Some(c) = capacity {
        anyhow::ensure!(c > 0, "capacity must be a positive integer");
    }
    if let Some(r) = refill_rate_per_second {
        anyhow::ensure!(r > 0, "refill_rate_per_second must be a positive integer");
    }
    Ok(())
}

/// Partial update — any field left `None` is left unchanged. Rate-limit
/// fields are updated as a pair: to change either, supply both (or supply
/// neither to leave both as-is). `path` changes are accepted, but note the
/// base spec's open question: existing Redis bucket keys are derived from
/// the *old* path and become orphaned (TTL-evicted) rather than migrated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteUpdate {
    pub path: Option<String>,
    pub target_url: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub capacity: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub refill_rate_per_second: Option<Option<i64>>,
}

/// Distinguishes "field absent" from "field explicitly set to null" in a
/// partial-update payload — serde's default `Option<Option<T>>` collapses
/// both to `None`, so we deserialize through an intermediate `Option<T>`.
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("a route for path `{0}` already exists")]
    DuplicatePath(String),
    #[error("route {0} not found")]
    NotFound(i64),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Durable storage of [`Route`] records, backed by SQLite.
pub struct RouteStore {
    pool: SqlitePool,
}

impl RouteStore {
    /// Open (creating if absent) the SQLite database at `database_path` and
    /// ensure the `routes` table exists.
    pub async fn open(database_path: &std::path::Path) -> anyhow::Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", database_path.display());
        let pool = SqlitePoolOptions::new().max_connections(8).connect(&url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS routes (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                path                    TEXT NOT NULL UNIQUE,
                target_url              TEXT NOT NULL,
                capacity                INTEGER,
                refill_rate_per_second  INTEGER,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
        sqlx::query(
            r#"
            CREATE TABLE routes (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                path                    TEXT NOT NULL UNIQUE,
                target_url              TEXT NOT NULL,
                capacity                INTEGER,
                refill_rate_per_second  INTEGER,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Insert a new route. Fails with [`StoreError::DuplicatePath`] if
    /// `route.path` is already present.
    pub async fn insert(&self, route: NewRoute) -> Result<Route, StoreError> {
        route.validate().map_err(|e| StoreError::Invalid(e.to_string()))?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO routes (path, target_url, capacity, refill_rate_per_second, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(&route.path)
        .bind(&route.target_url)
        .bind(route.capacity)
        .bind(route.refill_rate_per_second)
        .bind(now)
        .execute(&self.pool)
        .await;

        let id = match result {
            Ok(r) => r.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::DuplicatePath(route.path));
            }
            Err(e) => return Err(StoreError::Sql(e)),
        };

        Ok(Route {
            id,
            path: route.path,
            target_url: route.target_url,
            capacity: route.capacity,
            refill_rate_per_second: route.refill_rate_per_second,
            created_at: now,
            updated_at: now,
        })
    }

    /// Return every route. Ordering is unspecified.
    pub async fn find_all(&self) -> Result<Vec<Route>, StoreError> {
        let routes = sqlx::query_as::<_, Route>("SELECT * FROM routes").fetch_all(&self.pool).await?;
        Ok(routes)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Route>, StoreError> {
        let route = sqlx::query_as::<_, Route>("SELECT * FROM routes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(route)
    }

    pub async fn find_by_path(&self, path: &str) -> Result<Option<Route>, StoreError> {
        let route = sqlx::query_as::<_, Route>("SELECT * FROM routes WHERE path = ?1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(route)
    }

    /// Apply a partial update. Returns [`StoreError::NotFound`] if `id` does
    /// not exist, [`StoreError::Invalid`] if the merged result violates a
    /// route invariant (empty `path`/`target_url`, or `capacity`/
    /// `refill_rate_per_second` set unpaired), [`StoreError::DuplicatePath`]
    /// if the new `path` collides with another route. `updated_at` is
    /// refreshed unconditionally.
    pub async fn update(&self, id: i64, fields: RouteUpdate) -> Result<Route, StoreError> {
        let mut existing = self.find_by_id(id).await?.ok_or(StoreError::NotFound(id))?;

        if let Some(path) = fields.path {
            existing.path = path;
        }
        if let Some(target_url) = fields.target_url {
            existing.target_url = target_url;
        }
        if let Some(capacity) = fields.capacity {
            existing.capacity = capacity;
        }
        if let Some(refill) = fields.refill_rate_per_second {
            existing.refill_rate_per_second = refill;
        }

        validate_route_fields(&existing.path, &existing.target_url, existing.capacity, existing.refill_rate_per_second)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        existing.updated_at = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE routes
            SET path = ?1, target_url = ?2, capacity = ?3, refill_rate_per_second = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(&existing.path)
        .bind(&existing.target_url)
        .bind(existing.capacity)
        .bind(existing.refill_rate_per_second)
        .bind(existing.updated_at)
        .bind(id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(existing),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicatePath(existing.path)),
            Err(e) => Err(StoreError::Sql(e)),
        }
    }

    /// Delete the route with the given id. Returns whether it existed.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM routes WHERE id = ?1").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

/// SQLite reports unique-constraint violations as a generic database error;
/// the `sqlite3` error code for a unique-constraint failure is `2067`
/// (`SQLITE_CONSTRAINT_UNIQUE`). `sqlx`'s SQLite backend surfaces that as
/// `Error::Database` with `code() == Some("2067")`.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("2067"))
}
