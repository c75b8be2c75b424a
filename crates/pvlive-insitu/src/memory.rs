//! In-process network for tests and single-binary demos.
//!
//! [`MemoryNetwork`] is a hub of listening ports. Clones share the hub, so
//! a simulation link and a visualization link built from clones of one
//! network can reach each other. Frames travel over tokio channels.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::controller::{Connection, Listener, NetworkAccessManager, Transport};
use crate::error::LinkError;
use crate::frame::Frame;
use crate::url::ConnectionUrl;

/// One end of an in-process connection.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                tx: Some(a_tx),
                rx: b_rx,
            },
            MemoryTransport {
                tx: Some(b_tx),
                rx: a_rx,
            },
        )
    }
}

impl Transport for MemoryTransport {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), LinkError> {
        let tx = self.tx.as_ref().ok_or(LinkError::NotConnected)?;
        tx.send(frame).map_err(|_| LinkError::Closed)
    }

    async fn recv_frame(&mut self) -> Result<Frame, LinkError> {
        self.rx.recv().await.ok_or(LinkError::Closed)
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

#[derive(Debug)]
struct Port {
    handshake: String,
    incoming: mpsc::UnboundedSender<MemoryTransport>,
}

/// In-process [`NetworkAccessManager`].
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    ports: Arc<DashMap<u16, Port>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self, port: u16) -> bool {
        self.ports.contains_key(&port)
    }
}

impl NetworkAccessManager for MemoryNetwork {
    type Conn = MemoryTransport;
    type Listener = MemoryListener;

    async fn new_connection(
        &mut self,
        url: &ConnectionUrl,
    ) -> Result<Connection<MemoryTransport, MemoryListener>, LinkError> {
        if url.listen {
            if self.ports.contains_key(&url.port) {
                return Err(LinkError::AddressInUse { port: url.port });
            }
            let (incoming, rx) = mpsc::unbounded_channel();
            self.ports.insert(
                url.port,
                Port {
                    handshake: url.handshake.clone(),
                    incoming,
                },
            );
            tracing::debug!(port = url.port, "memory network listening");
            return Ok(Connection::Listening(MemoryListener {
                port: url.port,
                ports: Arc::clone(&self.ports),
                rx,
            }));
        }

        let port = self
            .ports
            .get(&url.port)
            .ok_or_else(|| LinkError::ConnectionRefused {
                url: url.to_string(),
            })?;
        if port.handshake != url.handshake {
            return Err(LinkError::HandshakeMismatch {
                expected: url.handshake.clone(),
                found: port.handshake.clone(),
            });
        }
        let (client, server) = MemoryTransport::pair();
        port.incoming
            .send(server)
            .map_err(|_| LinkError::ConnectionRefused {
                url: url.to_string(),
            })?;
        Ok(Connection::Established(client))
    }
}

/// Listening end of a memory port. Dropping it frees the port.
#[derive(Debug)]
pub struct MemoryListener {
    port: u16,
    ports: Arc<DashMap<u16, Port>>,
    rx: mpsc::UnboundedReceiver<MemoryTransport>,
}

impl Listener for MemoryListener {
    type Conn = MemoryTransport;

    async fn try_accept(&mut self) -> Result<Option<MemoryTransport>, LinkError> {
        Ok(self.rx.try_recv().ok())
    }

    async fn accept(&mut self, timeout: Duration) -> Result<Option<MemoryTransport>, LinkError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(conn) => Ok(conn),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.ports.remove(&self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_without_listener_is_refused() {
        let mut net = MemoryNetwork::new();
        let result = net
            .new_connection(&ConnectionUrl::connect("localhost", 7, "1.0"))
            .await;
        assert!(matches!(result, Err(LinkError::ConnectionRefused { .. })));
    }

    #[tokio::test]
    async fn version_mismatch_is_refused() {
        let mut net = MemoryNetwork::new();
        let _listener = net
            .new_connection(&ConnectionUrl::listen(7, "1.0"))
            .await
            .unwrap();
        let result = net
            .new_connection(&ConnectionUrl::connect("localhost", 7, "2.0"))
            .await;
        assert!(matches!(result, Err(LinkError::HandshakeMismatch { .. })));
    }

    #[tokio::test]
    async fn dropping_listener_frees_port() {
        let mut net = MemoryNetwork::new();
        let listener = net
            .new_connection(&ConnectionUrl::listen(7, "1.0"))
            .await
            .unwrap();
        assert!(matches!(
            net.new_connection(&ConnectionUrl::listen(7, "1.0")).await,
            Err(LinkError::AddressInUse { port: 7 })
        ));
        drop(listener);
        assert!(!net.is_listening(7));
    }

    #[tokio::test]
    async fn queued_connection_is_accepted_without_waiting() {
        let mut net = MemoryNetwork::new();
        let Connection::Listening(mut listener) = net
            .new_connection(&ConnectionUrl::listen(7, "1.0"))
            .await
            .unwrap()
        else {
            panic!("expected a listener");
        };
        assert!(listener.try_accept().await.unwrap().is_none());

        let Connection::Established(mut client) = net
            .new_connection(&ConnectionUrl::connect("localhost", 7, "1.0"))
            .await
            .unwrap()
        else {
            panic!("expected a connection");
        };
        let mut server = listener.try_accept().await.unwrap().unwrap();
        client.send_frame(Frame::new(1, vec![9])).await.unwrap();
        assert_eq!(server.recv_frame().await.unwrap(), Frame::new(1, vec![9]));
    }
}
