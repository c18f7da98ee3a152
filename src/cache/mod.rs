//! On-disk cache of finished scan results.

pub mod store;
