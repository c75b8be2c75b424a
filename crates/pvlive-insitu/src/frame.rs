//! Tag-and-length framing used on every link connection.
//!
//! A frame is the message tag (u32, little endian), the payload length
//! (u32, little endian), then the payload bytes.

use crate::error::LinkError;

/// Size of the tag plus length header.
pub const HEADER_LEN: usize = 8;

/// Largest payload a peer may announce.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Message tags of the insitu protocol.
pub mod tags {
    /// Length of the initial pipeline state.
    pub const HANDSHAKE_LENGTH: u32 = 8000;
    /// Initial pipeline state bytes.
    pub const HANDSHAKE_PAYLOAD: u32 = 8001;
    /// Length of an updated pipeline state. Zero means unchanged.
    pub const UPDATE_LENGTH: u32 = 8010;
    pub const UPDATE_PAYLOAD: u32 = 8011;

    /// Remote call: the simulation reached a new time step.
    pub const UPDATE_RMI: u32 = 8800;
    /// Remote call: the simulation produced its extracts for the step.
    pub const POSTPROCESS_RMI: u32 = 8801;
    /// Reserved.
    pub const INITIALIZE_CONNECTION: u32 = 8802;
    /// Reserved.
    pub const DROP_CONNECTION: u32 = 8803;

    pub const ALL: [u32; 8] = [
        HANDSHAKE_LENGTH,
        HANDSHAKE_PAYLOAD,
        UPDATE_LENGTH,
        UPDATE_PAYLOAD,
        UPDATE_RMI,
        POSTPROCESS_RMI,
        INITIALIZE_CONNECTION,
        DROP_CONNECTION,
    ];

    pub fn is_protocol_tag(tag: u32) -> bool {
        ALL.contains(&tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: u32, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            tag,
            payload: payload.into(),
        }
    }

    /// Appends the encoded frame to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), LinkError> {
        if self.payload.len() > MAX_FRAME_LEN {
            return Err(LinkError::FrameTooLarge {
                len: self.payload.len(),
                max: MAX_FRAME_LEN,
            });
        }
        out.reserve(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.tag.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Removes one complete frame from the front of `buf`. Returns `None`
    /// and leaves `buf` untouched if the frame is not complete yet.
    pub fn decode(buf: &mut Vec<u8>) -> Result<Option<Frame>, LinkError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let tag = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(LinkError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let payload = buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        buf.drain(..HEADER_LEN + len);
        Ok(Some(Frame { tag, payload }))
    }
}

/// Payload of a remote call: the simulation time.
pub fn encode_time(time: f64) -> Vec<u8> {
    time.to_le_bytes().to_vec()
}

pub fn decode_time(payload: &[u8]) -> Result<f64, LinkError> {
    let bytes: [u8; 8] = payload.try_into().map_err(|_| {
        LinkError::protocol(format!(
            "remote call carries {} bytes, expected an 8 byte time",
            payload.len()
        ))
    })?;
    Ok(f64::from_le_bytes(bytes))
}

/// Payload of a length frame.
pub fn encode_length(len: usize) -> Result<Vec<u8>, LinkError> {
    let len = u32::try_from(len).map_err(|_| LinkError::FrameTooLarge {
        len,
        max: MAX_FRAME_LEN,
    })?;
    Ok(len.to_le_bytes().to_vec())
}

pub fn decode_length(payload: &[u8]) -> Result<usize, LinkError> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| {
        LinkError::protocol(format!(
            "length frame carries {} bytes, expected 4",
            payload.len()
        ))
    })?;
    Ok(u32::from_le_bytes(bytes) as usize)
}
