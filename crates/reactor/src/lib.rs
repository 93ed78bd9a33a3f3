pub mod epoll;
pub mod error;
pub mod slab;
pub mod socket;

pub use epoll::{Epoll, EpollEvent, EPOLLIN, EPOLLOUT};
pub use error::{ReactorError, ReactorResult};
pub use slab::Slab;
