//! RelayPulse: an active-probing availability monitor for LLM
//! chat-completion APIs.
//!
//! The binary entrypoint lives in `main.rs`; this crate root exists so
//! integration tests and the binary share one module tree.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;

pub use error::{RelayError, Result};
