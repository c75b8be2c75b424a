//! Identifier newtypes for server-side objects and sessions.
//!
//! Both IDs are distinct newtype wrappers over `u32`, so a `SessionId` cannot
//! be used where a `GlobalId` is expected. Neither is unique across
//! processes: the proxy locator remaps ids found in foreign state onto live
//! local objects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Process-local identifier of a server-side object ("global id").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

/// Identifier of a session. Holders never own the session; liveness is
/// checked through [`SessionRegistry`](crate::session::SessionRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GlobalId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(GlobalId)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(SessionId)
    }
}
