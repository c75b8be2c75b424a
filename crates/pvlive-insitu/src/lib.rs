//! Live insitu link: state exchange between a simulation and a
//! visualization server.
//!
//! # Modules
//!
//! - [`frame`]: tag-and-length framing and protocol tags
//! - [`url`]: connection URLs with the versioned handshake token
//! - [`controller`]: transport traits and receive-by-tag messaging
//! - [`memory`]: in-process network
//! - [`tcp`]: TCP network
//! - [`link`]: the `LiveInsituLink` state machine
//! - [`config`]: link configuration

pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod link;
pub mod memory;
pub mod tcp;
pub mod url;

pub use config::{LinkConfig, ProcessType};
pub use controller::{Connection, Listener, MultiProcessController, NetworkAccessManager, Transport};
pub use error::LinkError;
pub use frame::{tags, Frame};
pub use link::{LinkState, LiveInsituLink, RmiCall, UpdateOutcome};
pub use memory::{MemoryListener, MemoryNetwork, MemoryTransport};
pub use tcp::{TcpInsituListener, TcpNetwork, TcpTransport};
pub use url::ConnectionUrl;
