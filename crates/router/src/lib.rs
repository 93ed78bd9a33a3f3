pub mod arp;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod proto;
pub mod rtable;

pub use arp::ArpCache;
pub use config::{load_interfaces, load_routing_table, Interface, Interfaces};
pub use error::{RouterError, RouterResult};
pub use forwarder::{Forwarder, PacketSink};
pub use rtable::RoutingTable;
