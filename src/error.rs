use std::io;

use thiserror::Error;

/// Errors raised while talking to Quake II master or game servers.
///
/// Discovery never hands these to its caller; they are logged and turned into
/// an empty or partial result. The prober only surfaces [Q2QueryError::ProbeClosed].
#[derive(Debug, Error)]
pub enum Q2QueryError {
    #[error("offset {offset} out of bounds for buffer of {len} bytes")]
    OffsetOutOfBounds { offset: usize, len: usize },

    #[error("failed to bind local port: {0}")]
    FailedPortBind(#[source] io::Error),

    #[error("failed to send packet: {0}")]
    SendError(#[source] io::Error),

    #[error("failed to receive packet: {0}")]
    ReceiveError(#[source] io::Error),

    #[error("host unreachable: {0}")]
    UnreachableHost(#[source] io::Error),

    #[error("failed to resolve {host}: {source}")]
    ResolveError {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} has no IPv4 address")]
    NoIpv4Address(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid http master url: {0}")]
    InvalidUrl(String),

    #[error("server probe is already closed")]
    ProbeClosed,
}

/// Rejected [crate::config::ProbeConfiguration] values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("master server address must not be empty")]
    EmptyMasterAddress,

    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("max concurrent probes must be between 1 and 200, got {0}")]
    InvalidMaxConcurrentProbes(usize),

    #[error("probe timeout must be between 1 and 60000 ms, got {0}")]
    InvalidProbeTimeout(u64),

    #[error("URL must be a valid HTTP or HTTPS URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value {value:?} for {name}")]
    InvalidEnvValue { name: String, value: String },
}
