//! Simulated TCP.

use std::io;

use async_trait::async_trait;
use relaymesh_core::transport::{Listener, Transport};
use turmoil::net::{TcpListener, TcpStream};

/// Connects over turmoil's simulated network. Addresses are `host:port`
/// with turmoil host names.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;

    async fn connect(&self, remote: &str) -> io::Result<Self::Stream> {
        TcpStream::connect(remote).await
    }
}

/// Accepts connections on turmoil's simulated network.
pub struct SimListener {
    listener: TcpListener,
}

impl SimListener {
    /// Bind on the current host, e.g. `0.0.0.0:12001`.
    pub async fn bind(address: &str) -> io::Result<Self> {
        Ok(Self { listener: TcpListener::bind(address).await? })
    }
}

#[async_trait]
impl Listener for SimListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(Self::Stream, String)> {
        let (stream, peer) = self.listener.accept().await?;
        Ok((stream, peer.to_string()))
    }
}
