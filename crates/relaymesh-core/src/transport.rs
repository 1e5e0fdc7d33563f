//! Transport abstraction for stream-oriented connections.
//!
//! Production uses tokio TCP, tests use turmoil's simulated TCP. The router
//! protocol only needs an ordered byte stream per connection; framing is done
//! by [`read_frame`] and [`write_frame`].

use std::io;

use async_trait::async_trait;
use relaymesh_proto::{Frame, FrameHeader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Outbound side of a transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connected byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `remote` (`host:port`).
    ///
    /// Resolves once the stream is established. Callers bound the wait with
    /// their own timeout.
    async fn connect(&self, remote: &str) -> io::Result<Self::Stream>;
}

/// Inbound side of a transport.
#[async_trait]
pub trait Listener: Send + 'static {
    /// Accepted byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection. Returns the stream and a printable peer
    /// address.
    async fn accept(&mut self) -> io::Result<(Self::Stream, String)>;
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary. A stream
/// that ends mid-frame is an `UnexpectedEof` error; a malformed header is
/// `InvalidData`.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; FrameHeader::SIZE];
    let mut filled = 0;
    while filled < FrameHeader::SIZE {
        let n = reader.read(&mut header_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended inside header"));
        }
        filled += n;
    }

    let header = FrameHeader::from_bytes(&header_buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut payload = vec![0u8; header.payload_size() as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Some(Frame::new(header, payload)))
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(frame.encoded_len());
    frame.encode(&mut buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&buf).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use relaymesh_proto::{Opcode, Payload};

    use super::*;

    #[tokio::test]
    async fn frames_survive_a_stream() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let ping = Payload::Ping.into_frame().unwrap();
        let data = Frame::new(FrameHeader::new(Opcode::Data), vec![7u8; 100]);

        let writer = tokio::spawn(async move {
            write_frame(&mut a, &ping).await.unwrap();
            write_frame(&mut a, &data).await.unwrap();
        });

        let first = read_frame(&mut b).await.unwrap().unwrap();
        let second = read_frame(&mut b).await.unwrap().unwrap();
        writer.await.unwrap();

        assert_eq!(first.opcode(), Some(Opcode::Ping));
        assert_eq!(second.payload.len(), 100);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_header_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&FrameHeader::MAGIC).await.unwrap();
        drop(a);

        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn bad_magic_is_invalid_data() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0u8; FrameHeader::SIZE]).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
