pub mod camera;
pub mod face;
pub mod schedule;
pub mod session;
#[cfg(feature = "facial-recognition")]
pub mod onnx;

pub use session::{CycleOutcome, QuitSignal, SessionController, SessionState, SessionSummary};
