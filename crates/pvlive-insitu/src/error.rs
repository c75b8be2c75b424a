//! Insitu link error types.

use pvlive_core::CoreError;

/// Errors produced by framing, transports, the controller and the link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer went away.
    #[error("connection closed by peer")]
    Closed,

    #[error("no connection to the peer")]
    NotConnected,

    #[error("timed out after {waited_ms}ms waiting for tag {tags:?}")]
    Timeout { tags: Vec<u32>, waited_ms: u64 },

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The peer sent something the protocol does not allow.
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    /// Both ends run different versions.
    #[error("handshake mismatch: expected '{expected}', peer sent '{found}'")]
    HandshakeMismatch { expected: String, found: String },

    #[error("connection refused: nothing listens on {url}")]
    ConnectionRefused { url: String },

    #[error("port {port} is already in use")]
    AddressInUse { port: u16 },

    #[error("invalid connection URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid link configuration: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl LinkError {
    /// Whether the error means the connection is unusable. The link drops
    /// its controller on these and falls back to offline behavior.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LinkError::Io(_)
                | LinkError::Closed
                | LinkError::NotConnected
                | LinkError::Timeout { .. }
                | LinkError::FrameTooLarge { .. }
                | LinkError::Protocol { .. }
        )
    }

    /// Whether a listener should treat the error as one bad peer and keep
    /// listening: a version mismatch, or a connection that broke or
    /// misbehaved before completing its greeting.
    pub fn is_rejected_peer(&self) -> bool {
        matches!(self, LinkError::HandshakeMismatch { .. }) || self.is_transport()
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        LinkError::Protocol {
            reason: reason.into(),
        }
    }
}
