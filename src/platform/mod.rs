//! Platform-specific filesystem queries.

pub mod volume;
