//! Trellis Test - Shared test utilities for the trellis plugin runtime.
//!
//! This crate provides on-disk module fixtures and scripted mock modules
//! that can be used across trellis crates as a dev-dependency.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! trellis-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! use trellis_test::{CallLog, MockModule, ModuleFixture, PluginRoot, mock_loader, test_runtime};
//!
//! #[tokio::test]
//! async fn module_starts() {
//!     let root = PluginRoot::new();
//!     root.add(&ModuleFixture::new("alpha"));
//!
//!     let log = CallLog::new();
//!     let loader = mock_loader([MockModule::new("alpha", &log)]);
//!     let mut runtime = test_runtime(root.path(), loader);
//!
//!     runtime.discover().unwrap();
//!     runtime.start_all().await.unwrap();
//!     assert_eq!(log.starts(), ["alpha"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
