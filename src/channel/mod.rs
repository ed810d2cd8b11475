//! Privileged-boundary channels
//!
//! Named duplex ports between page contexts and the background process, the
//! per-channel message protocol, and the router that serves them.

pub mod port;
pub mod protocol;
pub mod router;

pub use port::{Connection, Connector, Port};
pub use protocol::{ChannelName, Envelope, HostRef, Reply};
pub use router::{Router, Services};
