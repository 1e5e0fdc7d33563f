//! TCP transport.

use std::io;

use async_trait::async_trait;
use relaymesh_core::transport::Transport;
use tokio::net::TcpStream;

/// Connects to routers over TCP with Nagle disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self, remote: &str) -> io::Result<Self::Stream> {
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
