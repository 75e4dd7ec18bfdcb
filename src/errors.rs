use thiserror::Error;

/// Failures reported by a [`PriceSource`](crate::data::fetcher::PriceSource).
///
/// The broadcast loop treats every variant the same way: the cycle is skipped
/// and retried. The variants exist for logging.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Request could not be sent or the round trip timed out.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream answered with a non-2xx status.
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected JSON shape.
    #[error("malformed price payload: {0}")]
    Decode(String),

    /// Payload parsed but carried no value for the configured instrument.
    #[error("instrument {0} missing from price payload")]
    MissingInstrument(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Startup configuration errors. All of them are fatal.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} env var not set")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}
