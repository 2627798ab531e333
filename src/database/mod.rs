pub mod error;
pub mod models;

#[cfg(test)]
mod tests;

use crate::Result;
use bon::bon;
use error::DatabaseError;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;

pub use models::*;

/// A unit of work. Every store/repair call takes one of these explicitly so
/// ordering mutations, compilation reads and repair batches each run inside
/// a single transaction.
pub type Tx<'c> = Transaction<'c, Sqlite>;

/// Database connection pool
pub struct Db {
    pool: SqlitePool,
}

#[bon]
impl Db {
    #[builder]
    /// Create a new database connection pool and run pending migrations.
    pub async fn new(db_path: &Path) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePool::connect_with(
            db_url
                .parse::<sqlx::sqlite::SqliteConnectOptions>()
                .map_err(|e| DatabaseError::connection(db_path, e))?
                .create_if_missing(true)
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(1))
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal),
        )
        .await
        .map_err(|e| DatabaseError::connection(db_path, e))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction. SQLite's single-writer semantics serialize
    /// concurrent reorder operations on the same scope (see refresh_orders).
    pub async fn begin(&self) -> Result<Tx<'static>> {
        Ok(self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::transaction("begin", e))?)
    }

    /// Close the database pool
    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Commit a transaction, mapping the error into our taxonomy.
pub async fn commit(tx: Tx<'_>) -> Result<()> {
    tx.commit()
        .await
        .map_err(|e| DatabaseError::transaction("commit", e))?;
    Ok(())
}

/// Fetch a firewall row or fail with NotFound.
pub async fn firewall_by_id(tx: &mut Tx<'_>, id: i64) -> Result<Firewall> {
    let fw = sqlx::query_as::<_, Firewall>(
        "SELECT id, fwcloud, cluster, fwmaster, name, options, status FROM firewall WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| DatabaseError::query("loading firewall", e))?;

    fw.ok_or_else(|| DatabaseError::not_found("firewall", id).into())
}

/// Set the needs-compile bit on a firewall.
pub async fn mark_firewall_uncompiled(tx: &mut Tx<'_>, firewall: i64) -> Result<()> {
    sqlx::query("UPDATE firewall SET status = status | 1 WHERE id = ?")
        .bind(firewall)
        .execute(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("marking firewall uncompiled", e))?;
    Ok(())
}

/// Clear the needs-compile bit; called only after a fully successful compile.
pub async fn mark_firewall_compiled(tx: &mut Tx<'_>, firewall: i64) -> Result<()> {
    sqlx::query("UPDATE firewall SET status = status & ~1 WHERE id = ?")
        .bind(firewall)
        .execute(&mut **tx)
        .await
        .map_err(|e| DatabaseError::query("marking firewall compiled", e))?;
    Ok(())
}
