//! Utility functions shared across the engine.
//!
//! - [`encoding`] - little-endian helpers for the dedup file format
//! - [`fingerprint`] - the 64-bit content fingerprint
//! - [`progress`] - progress bars that become no-ops without the `progress` feature

pub mod encoding;
pub mod fingerprint;
pub mod progress;

pub use encoding::*;
pub use fingerprint::*;
