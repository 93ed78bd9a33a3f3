use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error(transparent)]
    Reactor(#[from] reactor::ReactorError),

    #[error("message of {0} bytes exceeds the {1}-byte protocol cap")]
    TooLarge(u32, u32),

    #[error("unknown operation code {0}")]
    UnknownOp(u16),

    #[error("peer closed the connection")]
    PeerClosed,
}

pub type CipherResult<T> = Result<T, CipherError>;
