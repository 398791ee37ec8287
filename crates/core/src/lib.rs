pub mod drain;
pub mod error;
pub mod readiness;
pub mod signal;
pub mod telemetry;
pub mod version;

pub use error::{Cancellable, RelayError};
