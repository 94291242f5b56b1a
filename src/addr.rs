//! Placeholder endpoint address
//!
//! A tunnel rides inside an HTTP/2 stream, so there is no socket address that
//! belongs to it. Connections and listeners still expose address accessors to
//! look like ordinary network endpoints; they all report this constant.

use std::fmt;

/// Opaque, non-routable address of a tunnel endpoint
///
/// Every instance is equal to every other instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EndpointAddr;

impl EndpointAddr {
    /// Network name reported for tunnel endpoints
    pub const NETWORK: &'static str = "h2conn";

    /// Address string reported for tunnel endpoints
    pub const ADDRESS: &'static str = "h2conn-tunnel";

    /// Name of the network, analogous to "tcp" or "unix"
    pub fn network(&self) -> &'static str {
        Self::NETWORK
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::ADDRESS)
    }
}
