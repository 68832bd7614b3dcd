//! Build-time metadata embedded by the build script.
//!
//! The daemon reports [`VERSION`] in every status snapshot; the CLI prints
//! [`version_string`] so a stale binary is easy to spot.

/// The git commit hash at build time (short form).
pub const GIT_HASH: &str = env!("BRAINSTEM_GIT_HASH");

/// The build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("BRAINSTEM_BUILD_TIMESTAMP");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("BRAINSTEM_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version, git hash and profile, e.g. `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
