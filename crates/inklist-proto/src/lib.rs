//! Drawing-protocol plumbing shared by the inklist session directory.
//!
//! This crate knows two things about the upstream drawing server:
//!
//! - the shape of protocol version strings (`namespace:major.server.minor`,
//!   or the legacy `major.minor` form), and
//! - the version 4 login handshake, enough to probe a host and tell whether a
//!   compatible server is listening there.

pub mod probe;
pub mod version;

pub use probe::{ProbeError, ProbeTimeouts, check_host};
pub use version::server_version;
