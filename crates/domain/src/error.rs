/// Shared error type used across all Vextir crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("event bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("event bus delivery queue is full")]
    BusFull,

    #[error("driver {driver}: {message}")]
    DriverFailure { driver: String, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("event expired: {0}")]
    TtlExpired(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Short stable name for metrics keys (`error_types` counters).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Unauthorized(_) => "unauthorized",
            Error::CircuitOpen(_) => "circuit_open",
            Error::BusUnavailable(_) => "bus_unavailable",
            Error::BusFull => "bus_full",
            Error::DriverFailure { .. } => "driver_failure",
            Error::Timeout(_) => "timeout",
            Error::TtlExpired(_) => "ttl_expired",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
