pub mod context;
pub mod error;
pub mod header;
pub mod substrate;

pub mod test_support;

pub use context::{Context, State, MSS, WIN_SIZE};
pub use error::{StcpError, StcpResult};
pub use header::Header;
pub use substrate::{Application, Datagram};
