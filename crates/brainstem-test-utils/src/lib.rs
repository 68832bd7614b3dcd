#![deny(unsafe_code)]

//! Shared test utilities for the brainstem workspace.
//!
//! Provides a config builder, a daemon running on a throwaway socket, a
//! raw frame-level client and log capture so that individual crate
//! tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! brainstem-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod frames;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use daemon::TestDaemon;
pub use frames::RawClient;
