//! Per-connection handling: one read/respond/close cycle.
//!
//! The handler owns the connection for its whole lifetime; every return
//! path drops the stream halves, which closes the socket.

use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::info;

use crate::shutdown::Shutdown;

/// Fixed prefix prepended to every echoed message.
pub const REPLY_PREFIX: &[u8] = b"Get your message back: ";

/// Longest request line accepted, terminator included.
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Handle a single client connection.
///
/// Reads one `\n`-terminated message, writes it back behind
/// [`REPLY_PREFIX`] (terminator included), and closes the connection.
/// Both the read and the write race the shutdown signal so an in-flight
/// cycle aborts promptly when the server stops.
pub async fn handle(
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: Shutdown,
) -> Result<(), HandleError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader).take(MAX_LINE_BYTES);
    let mut message = Vec::new();

    tokio::select! {
        res = reader.read_until(b'\n', &mut message) => {
            res.map_err(HandleError::Read)?;
        }
        _ = shutdown.recv() => return Err(HandleError::Cancelled),
    }

    // EOF and the length cap both surface as a line with no terminator
    if message.last() != Some(&b'\n') {
        let err = if message.len() as u64 >= MAX_LINE_BYTES {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "line exceeds maximum length")
        } else {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before line terminator",
            )
        };
        return Err(HandleError::Read(err));
    }

    info!(
        peer = %peer,
        message = %String::from_utf8_lossy(&message).trim_end(),
        "message received"
    );

    let mut response = BytesMut::with_capacity(REPLY_PREFIX.len() + message.len());
    response.extend_from_slice(REPLY_PREFIX);
    response.extend_from_slice(&message);

    tokio::select! {
        res = writer.write_all(&response) => res.map_err(HandleError::Write)?,
        _ = shutdown.recv() => return Err(HandleError::Cancelled),
    }
    writer.flush().await.map_err(HandleError::Write)?;

    info!(peer = %peer, "message sent");

    Ok(())
}

/// Per-connection failures, surfaced to the dispatch loop for logging only
#[derive(Debug)]
pub enum HandleError {
    /// Stream ended or errored before a line terminator was seen
    Read(std::io::Error),
    /// Response could not be fully written to the socket
    Write(std::io::Error),
    /// The shutdown signal fired mid-cycle
    Cancelled,
}

impl std::fmt::Display for HandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleError::Read(e) => write!(f, "read failed: {}", e),
            HandleError::Write(e) => write!(f, "write failed: {}", e),
            HandleError::Cancelled => write!(f, "aborted by shutdown"),
        }
    }
}

impl std::error::Error for HandleError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Accepted stream, client stream, and the accepted peer address.
    async fn connected_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (accepted, peer) = listener.accept().await.unwrap();
        (accepted, client, peer)
    }

    #[tokio::test]
    async fn test_echoes_with_prefix() {
        let (accepted, mut client, peer) = connected_pair().await;
        let (_trigger, signal) = shutdown::channel();
        let handler = tokio::spawn(handle(accepted, peer, signal));

        client.write_all(b"hello\n").await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"Get your message back: hello\n");

        handler.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_echoes_exact_bytes_even_non_utf8() {
        let (accepted, mut client, peer) = connected_pair().await;
        let (_trigger, signal) = shutdown::channel();
        let handler = tokio::spawn(handle(accepted, peer, signal));

        client.write_all(b"\xff\xfe binary \x00\n").await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"Get your message back: \xff\xfe binary \x00\n");

        handler.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_eof_before_terminator_is_read_error() {
        let (accepted, mut client, peer) = connected_pair().await;
        let (_trigger, signal) = shutdown::channel();
        let handler = tokio::spawn(handle(accepted, peer, signal));

        client.write_all(b"no terminator").await.unwrap();
        client.shutdown().await.unwrap();

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, HandleError::Read(_)));

        // No response; the server side closed the connection
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_line_over_cap_is_read_error() {
        let (accepted, mut client, peer) = connected_pair().await;
        let (_trigger, signal) = shutdown::channel();
        let handler = tokio::spawn(handle(accepted, peer, signal));

        // The handler may close (and reset) the connection while the tail
        // of this write is still in flight
        let oversized = vec![b'a'; MAX_LINE_BYTES as usize + 1];
        let _ = client.write_all(&oversized).await;

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, HandleError::Read(_)));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending_read() {
        let (accepted, mut client, peer) = connected_pair().await;
        let (trigger, signal) = shutdown::channel();
        let handler = tokio::spawn(handle(accepted, peer, signal));

        // Client sends nothing; the handler is parked on the read
        trigger.fire();

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, HandleError::Cancelled));

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
    }
}
