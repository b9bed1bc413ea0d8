pub mod kalman;
pub mod processor;

pub use kalman::KalmanState;
pub use processor::{FusedTrackView, FusionProcessor};
