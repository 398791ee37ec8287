use relaykit_core::RelayError;
use sqlx::sqlite::{SqlitePoolOptions, SqliteSynchronous};
use sqlx::ConnectOptions;

use crate::model::{Run, ScanResultRow, TestResultRow};

/// Opens (creating if absent) the sqlite database backing the optional
/// SQL sinks for the http-tester and cf-scanner services (spec.md §4.9).
pub async fn open(db_path: &str) -> Result<sqlx::SqlitePool, RelayError> {
	let mut opts: sqlx::sqlite::SqliteConnectOptions = db_path
		.parse()
		.map_err(|e: sqlx::Error| RelayError::PersistenceFailed(e.into()))?;
	opts = opts
		.create_if_missing(true)
		.synchronous(SqliteSynchronous::Normal)
		.disable_statement_logging();

	let pool = SqlitePoolOptions::new()
		.max_connections(5)
		.connect_with(opts)
		.await
		.map_err(|e| RelayError::PersistenceFailed(e.into()))?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS http_test_runs (
			id TEXT PRIMARY KEY,
			options_json TEXT NOT NULL,
			total INTEGER NOT NULL,
			started_at TEXT NOT NULL
		)",
	)
	.execute(&pool)
	.await
	.map_err(|e| RelayError::PersistenceFailed(e.into()))?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS http_test_results (
			run_id TEXT NOT NULL,
			link TEXT NOT NULL,
			status TEXT NOT NULL,
			reason TEXT NOT NULL,
			delay_ms INTEGER NOT NULL,
			down_mbps REAL,
			up_mbps REAL,
			ip TEXT,
			loc TEXT,
			ttfb_ms INTEGER,
			connect_ms INTEGER
		)",
	)
	.execute(&pool)
	.await
	.map_err(|e| RelayError::PersistenceFailed(e.into()))?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS cf_scan_results (
			ip TEXT PRIMARY KEY,
			latency_ms INTEGER,
			down_mbps REAL,
			up_mbps REAL,
			error TEXT
		)",
	)
	.execute(&pool)
	.await
	.map_err(|e| RelayError::PersistenceFailed(e.into()))?;

	Ok(pool)
}

pub async fn insert_run(pool: &sqlx::SqlitePool, run: &Run) -> Result<(), RelayError> {
	sqlx::query("INSERT INTO http_test_runs (id, options_json, total, started_at) VALUES (?, ?, ?, ?)")
		.bind(&run.run_id)
		.bind(&run.options_json)
		.bind(run.total_configs as i64)
		.bind(run.started_at.to_rfc3339())
		.execute(pool)
		.await
		.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	Ok(())
}

/// Batched insert of a page of `TestResult` rows within one transaction.
pub async fn insert_test_results(pool: &sqlx::SqlitePool, rows: &[TestResultRow]) -> Result<(), RelayError> {
	if rows.is_empty() {
		return Ok(());
	}
	let mut tx = pool.begin().await.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	for row in rows {
		sqlx::query(
			"INSERT INTO http_test_results
				(run_id, link, status, reason, delay_ms, down_mbps, up_mbps, ip, loc, ttfb_ms, connect_ms)
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(&row.run_id)
		.bind(&row.link)
		.bind(&row.status)
		.bind(&row.reason)
		.bind(row.delay_ms)
		.bind(row.down_mbps)
		.bind(row.up_mbps)
		.bind(&row.ip)
		.bind(&row.loc)
		.bind(row.ttfb_ms)
		.bind(row.connect_ms)
		.execute(&mut *tx)
		.await
		.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	}
	tx.commit().await.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	Ok(())
}

/// Upserts a batch of `ScanResult` rows keyed on `ip` (spec.md §4.9).
pub async fn upsert_scan_results(pool: &sqlx::SqlitePool, rows: &[ScanResultRow]) -> Result<(), RelayError> {
	if rows.is_empty() {
		return Ok(());
	}
	let mut tx = pool.begin().await.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	for row in rows {
		sqlx::query(
			"INSERT INTO cf_scan_results (ip, latency_ms, down_mbps, up_mbps, error)
			 VALUES (?, ?, ?, ?, ?)
			 ON CONFLICT(ip) DO UPDATE SET
				latency_ms = excluded.latency_ms,
				down_mbps = excluded.down_mbps,
				up_mbps = excluded.up_mbps,
				error = excluded.error",
		)
		.bind(&row.ip)
		.bind(row.latency_ms)
		.bind(row.down_mbps)
		.bind(row.up_mbps)
		.bind(&row.error)
		.execute(&mut *tx)
		.await
		.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	}
	tx.commit().await.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	Ok(())
}

/// Paginated read for `GET /api/v1/http/test/history` (spec.md §6).
pub async fn query_test_results(pool: &sqlx::SqlitePool, limit: i64, offset: i64) -> Result<Vec<TestResultRow>, RelayError> {
	sqlx::query_as::<_, TestResultRow>(
		"SELECT run_id, link, status, reason, delay_ms, down_mbps, up_mbps, ip, loc, ttfb_ms, connect_ms
		 FROM http_test_results ORDER BY rowid DESC LIMIT ? OFFSET ?",
	)
	.bind(limit)
	.bind(offset)
	.fetch_all(pool)
	.await
	.map_err(|e| RelayError::PersistenceFailed(e.into()))
}

pub async fn clear_test_results(pool: &sqlx::SqlitePool) -> Result<(), RelayError> {
	sqlx::query("DELETE FROM http_test_results").execute(pool).await.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	sqlx::query("DELETE FROM http_test_runs").execute(pool).await.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	Ok(())
}

/// Paginated read for `GET /api/v1/scanner/cf/history` (spec.md §6).
pub async fn query_scan_results(pool: &sqlx::SqlitePool, limit: i64, offset: i64) -> Result<Vec<ScanResultRow>, RelayError> {
	sqlx::query_as::<_, ScanResultRow>(
		"SELECT ip, latency_ms, down_mbps, up_mbps, error
		 FROM cf_scan_results ORDER BY latency_ms IS NULL, latency_ms ASC LIMIT ? OFFSET ?",
	)
	.bind(limit)
	.bind(offset)
	.fetch_all(pool)
	.await
	.map_err(|e| RelayError::PersistenceFailed(e.into()))
}

pub async fn clear_scan_results(pool: &sqlx::SqlitePool) -> Result<(), RelayError> {
	sqlx::query("DELETE FROM cf_scan_results").execute(pool).await.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	#[tokio::test]
	async fn opens_and_creates_schema() {
		let pool = open(":memory:").await.unwrap();
		insert_run(
			&pool,
			&Run {
				run_id: "r1".to_string(),
				options_json: "{}".to_string(),
				total_configs: 1,
				started_at: Utc::now(),
			},
		)
		.await
		.unwrap();

		let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM http_test_runs")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(count.0, 1);
	}

	#[tokio::test]
	async fn scan_results_upsert_on_ip() {
		let pool = open(":memory:").await.unwrap();
		let row = ScanResultRow {
			ip: "1.1.1.1".to_string(),
			latency_ms: Some(10),
			down_mbps: None,
			up_mbps: None,
			error: None,
		};
		upsert_scan_results(&pool, &[row.clone()]).await.unwrap();
		let updated = ScanResultRow {
			latency_ms: Some(20),
			..row
		};
		upsert_scan_results(&pool, &[updated]).await.unwrap();

		let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cf_scan_results")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(count.0, 1);
		let latency: (i64,) = sqlx::query_as("SELECT latency_ms FROM cf_scan_results WHERE ip = '1.1.1.1'")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(latency.0, 20);
	}
}
