// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Byte stream transports

use std::{fmt, io, sync::Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Opens the byte stream of a client connection.
///
/// Invoked for every (re-)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn connect(&self) -> io::Result<Self::Stream>;
}

/// Hands out an already opened stream exactly once.
///
/// Every later connect attempt fails with [`io::ErrorKind::NotConnected`].
pub struct StreamConnector<S> {
    stream: Mutex<Option<S>>,
}

impl<S> StreamConnector<S> {
    pub const fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }
}

impl<S> fmt::Debug for StreamConnector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> Connector for StreamConnector<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Stream = S;

    async fn connect(&self) -> io::Result<S> {
        let stream = match self.stream.lock() {
            Ok(mut stream) => stream.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        stream.ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream already consumed"))
    }
}

#[cfg(feature = "tcp")]
pub use self::tcp::TcpConnector;

#[cfg(feature = "tcp")]
mod tcp {
    use std::{io, net::SocketAddr};

    use async_trait::async_trait;
    use tokio::net::TcpStream;

    use super::Connector;

    /// Connects to a _Modbus_ TCP server.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpConnector {
        socket_addr: SocketAddr,
    }

    impl TcpConnector {
        #[must_use]
        pub const fn new(socket_addr: SocketAddr) -> Self {
            Self { socket_addr }
        }

        #[must_use]
        pub const fn socket_addr(&self) -> SocketAddr {
            self.socket_addr
        }
    }

    #[async_trait]
    impl Connector for TcpConnector {
        type Stream = TcpStream;

        async fn connect(&self) -> io::Result<TcpStream> {
            let stream = TcpStream::connect(self.socket_addr).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}

#[cfg(feature = "rtu-serial")]
pub use self::serial::SerialConnector;

#[cfg(feature = "rtu-serial")]
mod serial {
    use std::io;

    use async_trait::async_trait;
    use tokio_serial::SerialStream;

    use super::Connector;

    /// Opens a serial port for _Modbus_ RTU.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SerialConnector {
        path: String,
        baud_rate: u32,
    }

    impl SerialConnector {
        #[must_use]
        pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
            Self {
                path: path.into(),
                baud_rate,
            }
        }

        #[must_use]
        pub const fn baud_rate(&self) -> u32 {
            self.baud_rate
        }
    }

    #[async_trait]
    impl Connector for SerialConnector {
        type Stream = SerialStream;

        async fn connect(&self) -> io::Result<SerialStream> {
            let builder = tokio_serial::new(&self.path, self.baud_rate);
            SerialStream::open(&builder).map_err(io::Error::from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_is_handed_out_once() {
        let (stream, _peer) = tokio::io::duplex(64);
        let connector = StreamConnector::new(stream);
        assert!(connector.connect().await.is_ok());
        let err = connector.connect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
