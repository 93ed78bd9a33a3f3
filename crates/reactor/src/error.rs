use std::io;
use thiserror::Error;

/// Shared error type for the non-blocking socket/epoll plumbing.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("slab exhausted (capacity {0})")]
    SlabFull(usize),
}

pub type ReactorResult<T> = Result<T, ReactorError>;
