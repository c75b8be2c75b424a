//! TCP network over tokio sockets.
//!
//! The connecting side opens with a hello frame carrying its handshake
//! token. The listening side compares it with its own and answers with an
//! accept or reject frame that carries the listener's token, so a version
//! mismatch is reported on both ends.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::controller::{Connection, Listener, NetworkAccessManager, Transport};
use crate::error::LinkError;
use crate::frame::Frame;
use crate::url::ConnectionUrl;

/// Connection-setup tags, below the protocol's own tag range.
const HELLO_TAG: u32 = 1;
const ACCEPT_TAG: u32 = 2;
const REJECT_TAG: u32 = 3;

const READ_CHUNK: usize = 16 * 1024;

/// Framed TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    /// Bytes read but not yet decoded into a frame.
    buffer: Vec<u8>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport {
            stream,
            buffer: Vec::new(),
        }
    }
}

impl Transport for TcpTransport {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), LinkError> {
        let bytes = frame.to_bytes()?;
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Frame, LinkError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = Frame::decode(&mut self.buffer)? {
                return Ok(frame);
            }
            // `read` is cancel safe and bytes are buffered before the next await.
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(LinkError::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// TCP [`NetworkAccessManager`].
#[derive(Debug, Clone)]
pub struct TcpNetwork {
    handshake_timeout: Duration,
}

impl TcpNetwork {
    pub fn new(handshake_timeout: Duration) -> Self {
        TcpNetwork { handshake_timeout }
    }
}

impl Default for TcpNetwork {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_HANDSHAKE_TIMEOUT_MS))
    }
}

impl NetworkAccessManager for TcpNetwork {
    type Conn = TcpTransport;
    type Listener = TcpInsituListener;

    async fn new_connection(
        &mut self,
        url: &ConnectionUrl,
    ) -> Result<Connection<TcpTransport, TcpInsituListener>, LinkError> {
        if url.listen {
            let listener = TcpListener::bind((url.host.as_str(), url.port)).await?;
            tracing::info!(addr = %listener.local_addr()?, "listening for insitu connections");
            return Ok(Connection::Listening(TcpInsituListener {
                listener,
                handshake: url.handshake.clone(),
                handshake_timeout: self.handshake_timeout,
            }));
        }

        let stream = TcpStream::connect((url.host.as_str(), url.port))
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::ConnectionRefused => LinkError::ConnectionRefused {
                    url: url.to_string(),
                },
                _ => LinkError::Io(err),
            })?;
        stream.set_nodelay(true)?;
        let mut transport = TcpTransport::new(stream);
        transport
            .send_frame(Frame::new(HELLO_TAG, url.handshake.as_bytes()))
            .await?;
        let reply = tokio::time::timeout(self.handshake_timeout, transport.recv_frame())
            .await
            .map_err(|_| LinkError::Timeout {
                tags: vec![ACCEPT_TAG, REJECT_TAG],
                waited_ms: self.handshake_timeout.as_millis() as u64,
            })??;
        let theirs = String::from_utf8_lossy(&reply.payload).into_owned();
        match reply.tag {
            ACCEPT_TAG => Ok(Connection::Established(transport)),
            REJECT_TAG => Err(LinkError::HandshakeMismatch {
                expected: url.handshake.clone(),
                found: theirs,
            }),
            other => Err(LinkError::protocol(format!(
                "unexpected handshake reply tag {other}"
            ))),
        }
    }
}

/// Listening TCP socket. Accepted streams are version checked before they
/// are handed out.
#[derive(Debug)]
pub struct TcpInsituListener {
    listener: TcpListener,
    handshake: String,
    handshake_timeout: Duration,
}

impl TcpInsituListener {
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, LinkError> {
        Ok(self.listener.local_addr()?)
    }

    async fn greet(&self, stream: TcpStream) -> Result<TcpTransport, LinkError> {
        stream.set_nodelay(true)?;
        let mut transport = TcpTransport::new(stream);
        let hello = tokio::time::timeout(self.handshake_timeout, transport.recv_frame())
            .await
            .map_err(|_| LinkError::Timeout {
                tags: vec![HELLO_TAG],
                waited_ms: self.handshake_timeout.as_millis() as u64,
            })??;
        if hello.tag != HELLO_TAG {
            return Err(LinkError::protocol(format!(
                "expected hello frame, got tag {}",
                hello.tag
            )));
        }
        let theirs = String::from_utf8_lossy(&hello.payload).into_owned();
        if theirs != self.handshake {
            transport
                .send_frame(Frame::new(REJECT_TAG, self.handshake.as_bytes()))
                .await?;
            return Err(LinkError::HandshakeMismatch {
                expected: self.handshake.clone(),
                found: theirs,
            });
        }
        transport
            .send_frame(Frame::new(ACCEPT_TAG, self.handshake.as_bytes()))
            .await?;
        Ok(transport)
    }
}

impl Listener for TcpInsituListener {
    type Conn = TcpTransport;

    async fn try_accept(&mut self) -> Result<Option<TcpTransport>, LinkError> {
        self.accept(Duration::ZERO).await
    }

    async fn accept(&mut self, timeout: Duration) -> Result<Option<TcpTransport>, LinkError> {
        let (stream, peer) = match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(accepted) => accepted?,
            Err(_) => return Ok(None),
        };
        tracing::debug!(%peer, "accepted insitu connection");
        self.greet(stream).await.map(Some)
    }
}
