use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StcpError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("connection refused during handshake: {0}")]
    ConnectionRefused(&'static str),
}

pub type StcpResult<T> = Result<T, StcpError>;
