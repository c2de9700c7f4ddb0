//! core-daemon library
//!
//! Configuration merge, process lifecycle, listener orchestration and the
//! remote execute client. Used by the `core-daemon` binary and its tests.
//!
//! CHANGELOG:
//! - 10/14/2026 - Initial library structure

pub mod client;
pub mod codec;
pub mod config;
pub mod daemon;
pub mod server;
