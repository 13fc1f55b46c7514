pub mod compute;
pub mod meta;
pub mod worker;

pub use compute::{GradientComputer, ImageGradientComputer};
pub use meta::{GradientData, GradientMeta, GradientRecord, GradientStatus};
pub use worker::{GradientEnqueuer, GradientJob, GradientWorker, GradientWorkerConfig, GradientWorkerHandle, NewGradientJob};

#[cfg(any(test, feature = "test-util"))]
pub use worker::fake;
