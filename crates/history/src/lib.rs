//! History store (C9): append-only CSV sinks plus optional indexed SQL
//! tables for test-run and scan results.

pub mod csv_sink;
pub mod model;
pub mod sql;

pub use csv_sink::{read_csv, CsvSink};
pub use model::{Run, ScanResultRow, TestResultRow};
