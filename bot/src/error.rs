use thiserror::Error;

/// Failure to establish (or keep) the chat network connection. Always fatal.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error talking to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("no welcome from server within {0} seconds")]
    RegistrationTimeout(u64),

    #[error("connection closed by server")]
    Closed,
}

/// Failure of a single channel join. Never fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("not connected")]
    NotConnected,

    #[error("join refused ({notice_id}): {text}")]
    Rejected { notice_id: String, text: String },

    #[error("no confirmation within {0} seconds")]
    Timeout(u64),

    #[error("connection dropped before the join was confirmed")]
    Disconnected,
}

/// Failure of an analytics query. Treated as "no candidates" by the scheduler.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("analytics request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("analytics backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed analytics response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingest request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ingest endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level failure that terminates the process with a non-zero status.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("chat network connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("chat event stream ended")]
    EventStreamClosed,

    #[error("{name} task failed: {source}")]
    Task {
        name: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}
