//! Network plumbing: the UDP announcement source and the sending agent.

pub mod agent;
pub mod iface;
pub mod udpsource;

pub use agent::{Agent, SendError, SendErrors};
pub use udpsource::UdpSource;
