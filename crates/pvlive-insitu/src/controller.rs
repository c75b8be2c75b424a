//! Tagged point-to-point messaging between the two link processes.
//!
//! A [`Transport`] moves whole [`Frame`]s. [`MultiProcessController`] sits
//! on top of it and offers receive-by-tag: frames that arrive while the
//! caller waits for another tag are kept and handed out later, so each
//! side can follow its own step of the protocol.
//!
//! Connections come from a [`NetworkAccessManager`], which turns a
//! [`ConnectionUrl`] into either an established transport or a
//! [`Listener`] the peer will connect to.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::LinkError;
use crate::frame::{decode_length, decode_time, encode_length, encode_time, tags, Frame};
use crate::url::ConnectionUrl;

/// Most frames kept for later receives.
pub const MAX_PENDING_FRAMES: usize = 256;

/// Reliable, ordered frame channel to one peer.
///
/// `recv_frame` must be cancel safe: dropping the future before it
/// completes may not lose a frame.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), LinkError>;
    async fn recv_frame(&mut self) -> Result<Frame, LinkError>;
    async fn close(&mut self) -> Result<(), LinkError>;
}

/// Pending side of a listening URL.
#[allow(async_fn_in_trait)]
pub trait Listener {
    type Conn: Transport;

    /// Returns a connection that is already waiting, without blocking on
    /// new arrivals.
    async fn try_accept(&mut self) -> Result<Option<Self::Conn>, LinkError>;

    /// Waits up to `timeout` for a connection.
    async fn accept(&mut self, timeout: Duration) -> Result<Option<Self::Conn>, LinkError>;
}

/// Outcome of [`NetworkAccessManager::new_connection`].
pub enum Connection<C, L> {
    Established(C),
    Listening(L),
}

/// Factory for connections.
#[allow(async_fn_in_trait)]
pub trait NetworkAccessManager {
    type Conn: Transport;
    type Listener: Listener<Conn = Self::Conn>;

    async fn new_connection(
        &mut self,
        url: &ConnectionUrl,
    ) -> Result<Connection<Self::Conn, Self::Listener>, LinkError>;
}

/// Receive-by-tag messaging over a [`Transport`].
pub struct MultiProcessController<T> {
    transport: T,
    /// Frames received while waiting for a different tag, oldest first.
    pending: VecDeque<Frame>,
}

impl<T: Transport> MultiProcessController<T> {
    pub fn new(transport: T) -> Self {
        MultiProcessController {
            transport,
            pending: VecDeque::new(),
        }
    }

    pub async fn send(&mut self, tag: u32, bytes: impl Into<Vec<u8>>) -> Result<(), LinkError> {
        self.transport.send_frame(Frame::new(tag, bytes)).await
    }

    /// Waits for the next frame tagged `tag`. `None` waits forever.
    pub async fn receive(
        &mut self,
        tag: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, LinkError> {
        let frame = self.receive_any(&[tag], timeout).await?;
        Ok(frame.payload)
    }

    /// Waits for the next frame carrying any of `tags`.
    pub async fn receive_any(
        &mut self,
        tags: &[u32],
        timeout: Option<Duration>,
    ) -> Result<Frame, LinkError> {
        if let Some(index) = self.pending.iter().position(|f| tags.contains(&f.tag)) {
            if let Some(frame) = self.pending.remove(index) {
                return Ok(frame);
            }
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let frame = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.transport.recv_frame())
                    .await
                    .map_err(|_| LinkError::Timeout {
                        tags: tags.to_vec(),
                        waited_ms: timeout.map_or(0, |t| t.as_millis() as u64),
                    })??,
                None => self.transport.recv_frame().await?,
            };
            if tags.contains(&frame.tag) {
                return Ok(frame);
            }
            self.buffer(frame);
        }
    }

    /// Keeps a frame for a later receive. Frames outside the protocol's tag
    /// set are dropped, and a full buffer drops its oldest frame.
    fn buffer(&mut self, frame: Frame) {
        if !tags::is_protocol_tag(frame.tag) {
            tracing::warn!(tag = frame.tag, "dropping frame with unknown tag");
            return;
        }
        if self.pending.len() >= MAX_PENDING_FRAMES {
            if let Some(dropped) = self.pending.pop_front() {
                tracing::warn!(tag = dropped.tag, "pending frame buffer full; dropping oldest");
            }
        }
        tracing::trace!(tag = frame.tag, "buffering out-of-order frame");
        self.pending.push_back(frame);
    }

    /// Sends a length frame on `length_tag`, then the bytes on `payload_tag`.
    /// An empty state is only the zero length frame.
    pub async fn send_state(
        &mut self,
        length_tag: u32,
        payload_tag: u32,
        bytes: &[u8],
    ) -> Result<(), LinkError> {
        self.send(length_tag, encode_length(bytes.len())?).await?;
        if !bytes.is_empty() {
            self.send(payload_tag, bytes.to_vec()).await?;
        }
        Ok(())
    }

    /// Counterpart of [`send_state`](Self::send_state). The timeout applies
    /// to each of the two frames.
    pub async fn receive_state(
        &mut self,
        length_tag: u32,
        payload_tag: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, LinkError> {
        let len = decode_length(&self.receive(length_tag, timeout).await?)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.receive(payload_tag, timeout).await?;
        if bytes.len() != len {
            return Err(LinkError::protocol(format!(
                "announced {len} state bytes, received {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Invokes the remote procedure registered under `tag`.
    pub async fn trigger_rmi(&mut self, tag: u32, time: f64) -> Result<(), LinkError> {
        self.send(tag, encode_time(time)).await
    }

    /// Waits for an incoming remote call on one of `tags`. `Ok(None)` means
    /// the timeout passed with no call.
    pub async fn next_rmi(
        &mut self,
        tags: &[u32],
        timeout: Option<Duration>,
    ) -> Result<Option<(u32, f64)>, LinkError> {
        match self.receive_any(tags, timeout).await {
            Ok(frame) => Ok(Some((frame.tag, decode_time(&frame.payload)?))),
            Err(LinkError::Timeout { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn close(&mut self) -> Result<(), LinkError> {
        self.pending.clear();
        self.transport.close().await
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tags;
    use crate::memory::MemoryTransport;

    #[tokio::test]
    async fn out_of_order_frames_are_kept_for_later() {
        let (a, b) = MemoryTransport::pair();
        let mut sender = MultiProcessController::new(a);
        let mut receiver = MultiProcessController::new(b);

        sender.send(tags::UPDATE_PAYLOAD, b"second".to_vec()).await.unwrap();
        sender.send(tags::HANDSHAKE_PAYLOAD, b"first".to_vec()).await.unwrap();

        let first = receiver.receive(tags::HANDSHAKE_PAYLOAD, None).await.unwrap();
        assert_eq!(first, b"first");
        assert_eq!(receiver.pending_frames(), 1);
        let second = receiver.receive(tags::UPDATE_PAYLOAD, None).await.unwrap();
        assert_eq!(second, b"second");
        assert_eq!(receiver.pending_frames(), 0);
    }

    #[tokio::test]
    async fn unknown_tags_are_not_buffered() {
        let (a, b) = MemoryTransport::pair();
        let mut sender = MultiProcessController::new(a);
        let mut receiver = MultiProcessController::new(b);

        sender.send(42, b"noise".to_vec()).await.unwrap();
        sender.trigger_rmi(tags::UPDATE_RMI, 1.0).await.unwrap();

        let call = receiver.next_rmi(&[tags::UPDATE_RMI], None).await.unwrap();
        assert_eq!(call, Some((tags::UPDATE_RMI, 1.0)));
        assert_eq!(receiver.pending_frames(), 0);
    }

    #[tokio::test]
    async fn pending_buffer_is_bounded() {
        let (a, b) = MemoryTransport::pair();
        let mut sender = MultiProcessController::new(a);
        let mut receiver = MultiProcessController::new(b);

        for i in 0..MAX_PENDING_FRAMES + 10 {
            let payload = (i as u32).to_le_bytes().to_vec();
            sender.send(tags::DROP_CONNECTION, payload).await.unwrap();
        }
        sender.trigger_rmi(tags::UPDATE_RMI, 0.0).await.unwrap();

        receiver.next_rmi(&[tags::UPDATE_RMI], None).await.unwrap();
        assert_eq!(receiver.pending_frames(), MAX_PENDING_FRAMES);
        // The oldest ten were dropped.
        let oldest = receiver.receive(tags::DROP_CONNECTION, None).await.unwrap();
        assert_eq!(oldest, 10u32.to_le_bytes());
    }

    #[tokio::test]
    async fn empty_state_is_a_single_zero_length_frame() {
        let (a, b) = MemoryTransport::pair();
        let mut sender = MultiProcessController::new(a);
        let mut receiver = MultiProcessController::new(b);

        sender
            .send_state(tags::UPDATE_LENGTH, tags::UPDATE_PAYLOAD, &[])
            .await
            .unwrap();
        sender
            .send_state(tags::UPDATE_LENGTH, tags::UPDATE_PAYLOAD, b"<S/>")
            .await
            .unwrap();

        let timeout = Some(Duration::from_millis(100));
        let first = receiver
            .receive_state(tags::UPDATE_LENGTH, tags::UPDATE_PAYLOAD, timeout)
            .await
            .unwrap();
        assert!(first.is_empty());
        let second = receiver
            .receive_state(tags::UPDATE_LENGTH, tags::UPDATE_PAYLOAD, timeout)
            .await
            .unwrap();
        assert_eq!(second, b"<S/>");
    }

    #[tokio::test]
    async fn receive_times_out() {
        let (_a, b) = MemoryTransport::pair();
        let mut receiver = MultiProcessController::new(b);
        let err = receiver
            .receive(tags::HANDSHAKE_LENGTH, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Timeout { waited_ms: 10, .. }));
    }

    #[tokio::test]
    async fn rmi_carries_time() {
        let (a, b) = MemoryTransport::pair();
        let mut sim = MultiProcessController::new(a);
        let mut viz = MultiProcessController::new(b);

        sim.trigger_rmi(tags::POSTPROCESS_RMI, 2.5).await.unwrap();
        let rmis = [tags::UPDATE_RMI, tags::POSTPROCESS_RMI];
        let call = viz
            .next_rmi(&rmis, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(call, Some((tags::POSTPROCESS_RMI, 2.5)));

        let none = viz
            .next_rmi(&[tags::UPDATE_RMI], Some(Duration::from_millis(5)))
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn closed_peer_is_reported() {
        let (a, b) = MemoryTransport::pair();
        let mut receiver = MultiProcessController::new(b);
        drop(a);
        assert!(matches!(
            receiver.receive(1, None).await,
            Err(LinkError::Closed)
        ));
    }
}
