//! Injected storage for configuration values and service connections.
//!
//! Both stores are read by many concurrent chat requests and written by the
//! configuration routes. Writes are last-writer-wins per key.
pub mod config;
pub mod connection;

use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type StoreResult<T> = Result<T, StoreError>;
