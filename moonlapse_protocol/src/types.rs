// Core ID types for the relay protocol.
//
// `ConnectionId` is assigned by the relay's connection registry, never sent
// on the wire. It lives here so both the relay and any consumer crate can
// name a peer without depending on the relay crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Registry-assigned connection ID. Strictly increasing within one registry
/// and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
