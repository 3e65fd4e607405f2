pub mod error;
pub mod models;

use std::path::Path;

use futures::future::BoxFuture;
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

pub use error::StoreError;

use crate::models::event::EventWriter;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle to the Trellis database: a SQLite pool with the schema applied.
#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Open (creating if missing) an on-disk database and run migrations.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }

    /// In-memory database for tests. Capped at one connection: every
    /// connection to `:memory:` would otherwise see its own empty schema.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }

    /// Run `f` inside a transaction, handing it the transactional
    /// connection and an event writer bound to it. Commits when `f`
    /// returns `Ok`; rolls back otherwise. Not reentrant.
    pub async fn in_txn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'c> FnOnce(
                &'c mut Transaction<'static, Sqlite>,
                &'c EventWriter,
            ) -> BoxFuture<'c, Result<T, StoreError>>
            + Send,
    {
        let mut tx = self.pool.begin().await?;
        let events = EventWriter;
        match f(&mut tx, &events).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!("transaction rollback failed: {rollback_err}");
                }
                Err(err)
            }
        }
    }
}
