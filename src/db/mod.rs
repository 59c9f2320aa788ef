use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

use crate::errors::AppResult;
use crate::utils::utc_now;

pub mod row_parsers;

/// How long a connection waits on another writer before SQLITE_BUSY.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn init() -> anyhow::Result<SqlitePool> {
	let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

	let options = connect_options(
		SqliteConnectOptions::from_str(&database_url).context("invalid DATABASE_URL")?,
	);

	let pool = SqlitePoolOptions::new()
		.max_connections(10)
		.min_connections(1)
		.acquire_timeout(Duration::from_secs(10))
		.connect_with(options)
		.await
		.context("failed to connect to database")?;

	sqlx::migrate!()
		.run(&pool)
		.await
		.context("failed to run migrations")?;

	Ok(pool)
}

/// WAL, foreign keys and a busy timeout for every pooled connection.
pub fn connect_options(options: SqliteConnectOptions) -> SqliteConnectOptions {
	options
		.create_if_missing(true)
		.foreign_keys(true)
		.journal_mode(SqliteJournalMode::Wal)
		.busy_timeout(BUSY_TIMEOUT)
}

/// Opens a transaction that holds the database write lock from its first
/// statement.
///
/// A plain `BEGIN` is deferred: a transaction that reads before it writes
/// would have to upgrade its read snapshot, and SQLite refuses that upgrade
/// with SQLITE_BUSY without waiting while any other connection writes.
/// Touching `write_lock` first takes the lock up front, queueing behind other
/// writers for up to [`BUSY_TIMEOUT`].
pub async fn begin_write(pool: &SqlitePool) -> AppResult<Transaction<'static, Sqlite>> {
	let mut tx = pool.begin().await?;

	sqlx::query("UPDATE write_lock SET claimed_at = ? WHERE id = 1")
		.bind(utc_now())
		.execute(&mut *tx)
		.await?;

	Ok(tx)
}
