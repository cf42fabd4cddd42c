//! Crate-wide error taxonomy.
//!
//! A single probe failure is data, not an exception (§4.2): this type is
//! reserved for the handful of things that actually abort a component —
//! bad configuration, storage failures, and I/O at startup/shutdown.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("probe transport error: {0}")]
    Transport(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
