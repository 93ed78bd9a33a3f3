use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Reactor(#[from] reactor::ReactorError),

    #[error("unknown interface: {0}")]
    UnknownInterface(String),

    #[error("malformed config line {0}: {1}")]
    BadConfigLine(usize, String),
}

pub type RouterResult<T> = Result<T, RouterError>;
