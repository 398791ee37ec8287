mod model;
mod service;

pub use model::{ActiveOutbound, RotationConfig, RotationState};
pub use service::{RotationEvent, RotationService};
