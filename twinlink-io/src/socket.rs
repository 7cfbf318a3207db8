//! TCP channel establishment
//!
//! The sender opens two connections to the receiver's listen address, one
//! after the other; the receiver accepts them in the same order. Connection
//! order defines the channel id.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream};
use thiserror::Error;
use tracing::{debug, info};
use twinlink_protocol::{ChannelId, CHANNEL_COUNT};

/// Socket setup errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to connect channel {channel} to {addr}: {source}")]
    Connect {
        channel: ChannelId,
        addr: SocketAddr,
        source: io::Error,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("Failed to accept channel {channel}: {source}")]
    Accept { channel: ChannelId, source: io::Error },

    #[error("Invalid socket address")]
    InvalidAddress,
}

/// Open both channels to a receiver, channel 0 first
pub fn connect_channels(addr: SocketAddr) -> Result<[TcpStream; CHANNEL_COUNT], SocketError> {
    let connect = |channel: ChannelId| -> Result<TcpStream, SocketError> {
        let stream = TcpStream::connect(addr).map_err(|source| SocketError::Connect {
            channel,
            addr,
            source,
        })?;
        stream.set_nodelay(true)?;
        info!(
            "Channel {} connected {} -> {}",
            channel,
            stream.local_addr()?,
            addr
        );
        Ok(stream)
    };

    let first = connect(ChannelId::ZERO)?;
    let second = connect(ChannelId::ONE)?;
    Ok([first, second])
}

/// Listening socket that accepts the two channels of one transfer
pub struct ChannelListener {
    inner: Socket,
}

impl ChannelListener {
    /// Bind and listen with an explicit backlog
    pub fn bind(addr: SocketAddr, backlog: i32) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket
            .bind(&addr.into())
            .map_err(|source| SocketError::Bind { addr, source })?;
        socket.listen(backlog)?;

        debug!("Listening on {} (backlog {})", addr, backlog);
        Ok(ChannelListener { inner: socket })
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Accept one connection as `channel`
    pub fn accept(&self, channel: ChannelId) -> Result<TcpStream, SocketError> {
        let (socket, peer) = self
            .inner
            .accept()
            .map_err(|source| SocketError::Accept { channel, source })?;
        let stream: TcpStream = socket.into();
        stream.set_nodelay(true)?;

        match peer.as_socket() {
            Some(peer) => info!("Channel {} accepted from {}", channel, peer),
            None => info!("Channel {} accepted", channel),
        }
        Ok(stream)
    }

    /// Accept both channels in connection order
    pub fn accept_channels(&self) -> Result<[TcpStream; CHANNEL_COUNT], SocketError> {
        let first = self.accept(ChannelId::ZERO)?;
        let second = self.accept(ChannelId::ONE)?;
        Ok([first, second])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;

    #[test]
    fn test_listener_bind() {
        let listener = ChannelListener::bind("127.0.0.1:0".parse().unwrap(), 5).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[test]
    fn test_channels_accepted_in_connect_order() {
        let listener = ChannelListener::bind("127.0.0.1:0".parse().unwrap(), 5).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = thread::spawn(move || {
            let [mut first, mut second] = connect_channels(addr).unwrap();
            first.write_all(&[0]).unwrap();
            second.write_all(&[1]).unwrap();
        });

        let [mut first, mut second] = listener.accept_channels().unwrap();
        let mut byte = [0u8; 1];
        first.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], 0);
        second.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], 1);

        client.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = ChannelListener::bind("127.0.0.1:0".parse().unwrap(), 1).unwrap();
            listener.local_addr().unwrap()
        };
        assert!(matches!(
            connect_channels(addr),
            Err(SocketError::Connect {
                channel: ChannelId::ZERO,
                ..
            })
        ));
    }
}
