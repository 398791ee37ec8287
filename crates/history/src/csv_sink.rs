use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use relaykit_core::RelayError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Append-only CSV sink batching rows until either `batch_size` is
/// reached or `flush_interval` has elapsed since the last flush, with a
/// final flush expected on shutdown (spec.md §4.5, §4.9).
///
/// Writes a header row only when the file is empty, then appends without
/// a header thereafter — tracked by checking file length on every flush
/// rather than in-memory state, so it is correct even across process
/// restarts onto the same file.
pub struct CsvSink<T> {
	path: PathBuf,
	headers: Vec<String>,
	batch: Vec<T>,
	batch_size: usize,
	flush_interval: Duration,
	last_flush: Instant,
	_marker: PhantomData<T>,
}

impl<T: Serialize> CsvSink<T> {
	pub fn new(path: impl Into<PathBuf>, headers: Vec<String>, batch_size: usize, flush_interval: Duration) -> Self {
		CsvSink {
			path: path.into(),
			headers,
			batch: Vec::new(),
			batch_size,
			flush_interval,
			last_flush: Instant::now(),
			_marker: PhantomData,
		}
	}

	pub fn push(&mut self, row: T) {
		self.batch.push(row);
	}

	pub fn should_flush(&self) -> bool {
		!self.batch.is_empty() && (self.batch.len() >= self.batch_size || self.last_flush.elapsed() >= self.flush_interval)
	}

	pub fn pending(&self) -> usize {
		self.batch.len()
	}

	/// Flushes the current batch to disk. Safe to call with an empty
	/// batch (no-op); safe to call repeatedly (every call resets the
	/// flush timer).
	pub fn flush(&mut self) -> Result<(), RelayError> {
		self.last_flush = Instant::now();
		if self.batch.is_empty() {
			return Ok(());
		}
		let file_is_empty = !self.path.exists()
			|| std::fs::metadata(&self.path)
				.map(|m| m.len() == 0)
				.unwrap_or(true);

		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
		let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

		if file_is_empty {
			writer
				.write_record(&self.headers)
				.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
		}
		for row in self.batch.drain(..) {
			writer
				.serialize(row)
				.map_err(|e| RelayError::PersistenceFailed(e.into()))?;
		}
		writer.flush().map_err(|e| RelayError::PersistenceFailed(e.into()))?;
		Ok(())
	}
}

/// Reads back a history CSV for resume. A missing file or a file with no
/// rows beyond (or including) the header is treated as "nothing to
/// resume", not an error — spec.md §4.9 "skipping an EOF from an empty
/// file".
pub fn read_csv<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, RelayError> {
	let path = path.as_ref();
	if !path.exists() {
		return Ok(Vec::new());
	}
	let mut reader = csv::Reader::from_path(path).map_err(|e| RelayError::PersistenceFailed(e.into()))?;
	let mut rows = Vec::new();
	for record in reader.deserialize::<T>() {
		match record {
			Ok(row) => rows.push(row),
			Err(e) => match e.kind() {
				// trailing EOF on an otherwise-empty (or header-only) file
				csv::ErrorKind::Io(io_err) if io_err.kind() == std::io::ErrorKind::UnexpectedEof => break,
				_ => return Err(RelayError::PersistenceFailed(e.into())),
			},
		}
	}
	Ok(rows)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;

	#[derive(Debug, Serialize, Deserialize, PartialEq)]
	struct Row {
		ip: String,
		latency_ms: i64,
	}

	#[test]
	fn writes_header_once_and_appends_thereafter() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("scan.csv");
		let mut sink = CsvSink::new(
			&path,
			vec!["ip".to_string(), "latency_ms".to_string()],
			10,
			Duration::from_secs(9999),
		);
		sink.push(Row { ip: "1.1.1.1".to_string(), latency_ms: 10 });
		sink.flush().unwrap();
		sink.push(Row { ip: "1.1.1.2".to_string(), latency_ms: 20 });
		sink.flush().unwrap();

		let contents = std::fs::read_to_string(&path).unwrap();
		assert_eq!(contents.lines().count(), 3); // header + 2 rows
		assert_eq!(contents.lines().next().unwrap(), "ip,latency_ms");

		let rows: Vec<Row> = read_csv(&path).unwrap();
		assert_eq!(rows, vec![
			Row { ip: "1.1.1.1".to_string(), latency_ms: 10 },
			Row { ip: "1.1.1.2".to_string(), latency_ms: 20 },
		]);
	}

	#[test]
	fn missing_file_resumes_empty() {
		let rows: Vec<Row> = read_csv("/nonexistent/path/surely.csv").unwrap();
		assert!(rows.is_empty());
	}
}
