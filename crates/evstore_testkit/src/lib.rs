//! # EvStore Testkit
//!
//! Test utilities for EvStore.
//!
//! This crate provides:
//! - Test fixtures and store helpers
//! - A scenario builder for populating stores
//! - Property-based test generators using proptest
//! - Crash simulation helpers for file-backed stores
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evstore_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|db| {
//!         ScenarioBuilder::new().events("orders", 3).complete_chunk().build(db).unwrap();
//!         assert_eq!(db.stream_info("orders").unwrap().last_event_number, 2);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
