use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Reactor(#[from] reactor::ReactorError),

    #[error("malformed response header: {0}")]
    BadResponseHeader(String),

    #[error("peer closed the connection")]
    PeerClosed,
}

pub type ProxyResult<T> = Result<T, ProxyError>;
