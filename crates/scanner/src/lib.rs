mod cidr;
mod impersonate;
mod model;
mod phase1;
mod phase2;
mod ranges;
mod writer;

pub use cidr::{hosts, inc};
pub use model::{ScanOptions, ScanResult, ScanResultSnapshot};
pub use ranges::CfRanges;
pub use writer::ResultWriter;

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use relaykit_core::RelayError;
use relaykit_history::ScanResultRow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CSV_HEADERS: [&str; 5] = ["ip", "latency_ms", "down_mbps", "up_mbps", "error"];

/// Runs both phases of the edge scan (spec.md §4.6), merging with resumed
/// history when `opts.resume` is set and writing the final sorted CSV
/// atomically (write to a temp path, then rename).
pub async fn scan(
	opts: ScanOptions,
	csv_path: Option<std::path::PathBuf>,
	sql_pool: Option<sqlx::SqlitePool>,
	ui_tx: mpsc::Sender<ScanResultSnapshot>,
	on_progress: Arc<dyn Fn(u64, u64) + Send + Sync>,
	cancel: CancellationToken,
) -> Result<Vec<ScanResultSnapshot>, RelayError> {
	let resume_skip: HashSet<IpAddr> = if opts.resume {
		csv_path
			.as_ref()
			.map(|p| relaykit_history::read_csv::<ScanResultRow>(p))
			.transpose()?
			.unwrap_or_default()
			.into_iter()
			.filter_map(|row| row.ip.parse().ok())
			.collect()
	} else {
		HashSet::new()
	};

	let writer = Arc::new(ResultWriter::new(ui_tx));

	phase1::run(&opts, &resume_skip, writer.clone(), on_progress.clone(), cancel.clone()).await;
	if let Some(pool) = &sql_pool {
		writer.flush_sql(pool).await;
	}

	let phase1_results = writer.all();
	phase2::run(&opts, &phase1_results, writer.clone(), on_progress, cancel).await;
	if let Some(pool) = &sql_pool {
		writer.flush_sql(pool).await;
	}

	let mut all_results = writer.all();
	// errors last, then ascending latency, then IP as the final tie-breaker so
	// equal-latency (or all-error) rows come out in stable IP order regardless
	// of `writer.all()`'s hash-map iteration order (spec.md §8 "sorted final
	// CSV has errors last, in stable IP order").
	all_results.sort_by(|a, b| {
		let a_err = a.is_error();
		let b_err = b.is_error();
		a_err
			.cmp(&b_err)
			.then_with(|| a.latency_ms().unwrap_or(u64::MAX).cmp(&b.latency_ms().unwrap_or(u64::MAX)))
			.then_with(|| a.ip.cmp(&b.ip))
	});

	let snapshots: Vec<ScanResultSnapshot> = all_results.iter().map(|r| r.snapshot()).collect();

	if let Some(path) = csv_path {
		write_csv_atomically(&path, &snapshots)?;
	}

	Ok(snapshots)
}

fn write_csv_atomically(path: &std::path::Path, snapshots: &[ScanResultSnapshot]) -> Result<(), RelayError> {
	let tmp_path = path.with_extension("csv.tmp");
	{
		let file = std::fs::File::create(&tmp_path).map_err(|e| RelayError::PersistenceFailed(e.into()))?;
		let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
		writer.write_record(CSV_HEADERS).map_err(|e| RelayError::PersistenceFailed(e.into()))?;
		for snapshot in snapshots {
			writer.serialize(snapshot).map_err(|e| RelayError::PersistenceFailed(e.into()))?;
		}
		writer.flush().map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	}
	std::fs::rename(&tmp_path, path).map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	Ok(())
}
