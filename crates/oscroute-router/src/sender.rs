//! OSC output
//!
//! A connected UDP socket for sending encoded packets to a single OSC
//! receiver.

use oscroute_core::{codec, Message, Packet};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::trace;

use crate::error::{Result, RouterError};

/// Sends OSC packets to one destination
pub struct OscSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl OscSender {
    /// Resolve `target` ("host:port") and connect an ephemeral socket to it
    pub async fn connect(target: &str) -> Result<Self> {
        let target = tokio::net::lookup_host(target)
            .await?
            .next()
            .ok_or_else(|| RouterError::Other(format!("{} resolved to no addresses", target)))?;

        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Encode and send one message
    pub async fn send(&self, message: &Message) -> Result<()> {
        let bytes = codec::encode(message)?;
        trace!("Sending {} ({} bytes) to {}", message.address, bytes.len(), self.target);
        self.send_raw(&bytes).await
    }

    /// Encode and send a message or bundle
    pub async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let bytes = codec::encode_packet(packet)?;
        self.send_raw(&bytes).await
    }

    /// Send already encoded bytes as one datagram
    pub async fn send_raw(&self, data: &[u8]) -> Result<()> {
        let sent = self.socket.send(data).await?;
        if sent != data.len() {
            return Err(RouterError::Other(format!(
                "short send: {} of {} bytes",
                sent,
                data.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_receiver() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();

        let sender = OscSender::connect(&addr.to_string()).await.unwrap();
        let message = Message::new("/test/value").with_float(0.5);
        sender.send(&message).await.unwrap();

        let mut buf = [0u8; 256];
        let (len, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(from.port(), sender.local_addr().unwrap().port());
        assert_eq!(codec::decode(&buf[..len]).unwrap(), message);
    }

    #[tokio::test]
    async fn test_invalid_message_not_sent() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender = OscSender::connect(&receiver.local_addr().unwrap().to_string())
            .await
            .unwrap();

        let err = sender.send(&Message::new("no-slash")).await.unwrap_err();
        assert!(matches!(err, RouterError::Core(_)));
    }
}
