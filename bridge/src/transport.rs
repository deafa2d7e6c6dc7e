//! Framed, compressed socket I/O towards the lobby server

use log::{debug, trace};
use shared::frame::{self, FrameError, HANDSHAKE};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Largest single read while assembling a frame
pub const READ_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One lobby connection.
///
/// Incoming bytes are buffered, so a read timeout in the middle of a frame
/// loses nothing: the next [`FrameTransport::receive_message`] call carries
/// on where the previous one stopped.
pub struct FrameTransport<S = TcpStream> {
    stream: S,
    read_timeout: Duration,
    inbound: Vec<u8>,
}

impl FrameTransport<TcpStream> {
    /// Opens a TCP connection and performs the handshake
    pub async fn connect(
        host: &str,
        port: u16,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream = timeout(read_timeout * 10, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout(read_timeout * 10))??;
        stream.set_nodelay(true)?;
        debug!("Connected to lobby at {}:{}", host, port);

        let mut transport = Self::new(stream, read_timeout);
        transport.handshake().await?;
        Ok(transport)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameTransport<S> {
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            read_timeout,
            inbound: Vec::new(),
        }
    }

    /// Sends the four zero bytes and reads back the session token
    pub async fn handshake(&mut self) -> Result<u32, TransportError> {
        self.write_fully(&HANDSHAKE).await?;

        let mut token = [0u8; 4];
        let wait = self.read_timeout * 5;
        match timeout(wait, self.stream.read_exact(&mut token)).await {
            Err(_) => return Err(TransportError::Timeout(wait)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::ConnectionLost(
                    "closed during handshake".to_string(),
                ))
            }
            Ok(result) => result?,
        };

        let token = u32::from_be_bytes(token);
        debug!("Handshake reply, connection number {}", token);
        Ok(token)
    }

    pub async fn send_message(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        trace!("sent {}", String::from_utf8_lossy(payload));
        let frame = frame::encode_frame(payload)?;
        self.write_fully(&frame).await
    }

    pub async fn send_text(&mut self, document: &str) -> Result<(), TransportError> {
        self.send_message(document.as_bytes()).await
    }

    /// Waits up to the read timeout for one message.
    ///
    /// `Ok(None)` means nothing arrived in time; it is not an error.
    pub async fn receive_message(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            if let Some(payload) = self.take_buffered_frame()? {
                return Ok(Some(payload));
            }

            let want = frame::bytes_wanted(&self.inbound)?.clamp(1, READ_CHUNK);
            let mut chunk = [0u8; READ_CHUNK];
            match timeout(self.read_timeout, self.stream.read(&mut chunk[..want])).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    return Err(TransportError::ConnectionLost(
                        "peer closed the socket".to_string(),
                    ))
                }
                Ok(Ok(n)) => self.inbound.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Like [`FrameTransport::receive_message`], decoded as UTF-8 text
    pub async fn receive_text(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self
            .receive_message()
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Keeps polling until a message arrives or `deadline` has passed
    pub async fn await_text(&mut self, deadline: Duration) -> Result<String, TransportError> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(text) = self.receive_text().await? {
                return Ok(text);
            }
            if started.elapsed() >= deadline {
                return Err(TransportError::Timeout(deadline));
            }
        }
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Lobby socket shutdown: {}", e);
        }
    }

    fn take_buffered_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Some((body, used)) = frame::split_frame(&self.inbound)? else {
            return Ok(None);
        };

        let payload = frame::decompress(body)?;
        self.inbound.drain(..used);
        if payload.is_empty() {
            return Err(TransportError::ConnectionLost(
                "received an empty document".to_string(),
            ));
        }
        trace!("received {}", String::from_utf8_lossy(&payload));
        Ok(Some(payload))
    }

    async fn write_fully(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut sent = 0;
        while sent < bytes.len() {
            let n = self.stream.write(&bytes[sent..]).await?;
            if n == 0 {
                return Err(TransportError::ConnectionLost(
                    "socket accepted no bytes".to_string(),
                ));
            }
            sent += n;
        }
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Action, BridgeError};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, ReadBuf};
    use tokio_test::io::Builder;

    const SHORT: Duration = Duration::from_millis(50);

    /// A socket that never reads and accepts zero bytes per write
    struct StalledSocket;

    impl AsyncRead for StalledSocket {
        fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for StalledSocket {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_handshake_writes_zeroes_and_reads_token() {
        let mock = Builder::new().write(&[0, 0, 0, 0]).read(&[0, 0, 1, 2]).build();
        let mut transport = FrameTransport::new(mock, SHORT);

        assert_eq!(transport.handshake().await.unwrap(), 258);
    }

    #[tokio::test]
    async fn test_send_writes_length_prefixed_gzip() {
        let expected = frame::encode_frame(b"[leave_game]\n[/leave_game]\n").unwrap();
        let mock = Builder::new().write(&expected).build();
        let mut transport = FrameTransport::new(mock, SHORT);

        transport
            .send_text("[leave_game]\n[/leave_game]\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_message_roundtrip_over_duplex() {
        let (a, b) = duplex(64 * 1024);
        let mut client = FrameTransport::new(a, SHORT);
        let mut server = FrameTransport::new(b, SHORT);

        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        client.send_message(&payload).await.unwrap();

        assert_eq!(server.receive_message().await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn test_timeout_is_not_an_error() {
        let (a, _b) = duplex(1024);
        let mut transport = FrameTransport::new(a, SHORT);

        assert!(transport.receive_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_split_across_timeouts_survives() {
        let (a, mut b) = duplex(1024);
        let mut transport = FrameTransport::new(a, SHORT);
        let frame = frame::encode_frame(b"[user]\nname=\"x\"\n[/user]").unwrap();

        b.write_all(&frame[..6]).await.unwrap();
        assert!(transport.receive_message().await.unwrap().is_none());

        b.write_all(&frame[6..]).await.unwrap();
        assert_eq!(
            transport.receive_text().await.unwrap().as_deref(),
            Some("[user]\nname=\"x\"\n[/user]")
        );
    }

    #[tokio::test]
    async fn test_two_frames_in_one_write() {
        let (a, mut b) = duplex(4096);
        let mut transport = FrameTransport::new(a, SHORT);
        let mut bytes = frame::encode_frame(b"one").unwrap();
        bytes.extend(frame::encode_frame(b"two").unwrap());
        b.write_all(&bytes).await.unwrap();

        assert_eq!(transport.receive_text().await.unwrap().as_deref(), Some("one"));
        assert_eq!(transport.receive_text().await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_empty_document_is_connection_lost() {
        let (a, mut b) = duplex(1024);
        let mut transport = FrameTransport::new(a, SHORT);
        b.write_all(&frame::encode_frame(b"").unwrap()).await.unwrap();

        assert!(matches!(
            transport.receive_message().await,
            Err(TransportError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_lost() {
        let (a, b) = duplex(1024);
        let mut transport = FrameTransport::new(a, SHORT);
        drop(b);

        assert!(matches!(
            transport.receive_message().await,
            Err(TransportError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn test_await_text_gives_up_after_deadline() {
        let (a, _b) = duplex(1024);
        let mut transport = FrameTransport::new(a, Duration::from_millis(10));

        assert!(matches!(
            transport.await_text(Duration::from_millis(30)).await,
            Err(TransportError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_byte_write_is_connection_lost() {
        let mut transport = FrameTransport::new(StalledSocket, SHORT);

        let err = transport
            .send_text("[join_lobby]\n[/join_lobby]\n")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionLost(_)));
        assert!(BridgeError::from(err).actions().contains(Action::ReconnectLobby));
    }
}
