//! Pure Rust async discovery and status querying for Quake II servers.
//!
//! Server addresses come from a UDP master (`getservers`), an HTTP mirror of the
//! master list, or a LAN broadcast. [probe::ServerProbe] then asks each one for
//! its `status` with a bounded number of probes in flight.
pub mod browser;
pub mod color;
pub mod config;
pub mod error;
pub mod http;
pub mod info;
pub mod lan;
pub mod logger;
pub mod master;
pub mod packet;
pub mod parse;
pub mod probe;

pub use config::ProbeConfiguration;
pub use error::{ConfigurationError, Q2QueryError};
pub use info::{PlayerInfo, ServerEntry};
pub use probe::{ProbeOutcome, ResultSink, ServerProbe};
