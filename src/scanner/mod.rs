//! Disk-usage scanner: probe, walker, progress, largest-file tracking, and the
//! single-flight coordinator.

pub mod cancel;
pub mod coordinator;
pub mod model;
pub mod probe;
pub mod progress;
pub mod top_k;
pub mod walker;
