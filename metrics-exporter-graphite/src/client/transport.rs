use std::{
    future::Future,
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use tokio::{
    io::AsyncWriteExt as _,
    net::{lookup_host, TcpStream, UdpSocket},
};

use super::{Endpoint, Protocol};

/// An open connection to a Graphite server.
pub(crate) enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

async fn with_timeout<F, T>(timeout: Duration, op: &'static str, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, format!("{op} timed out after {timeout:?}"))),
    }
}

async fn resolve(endpoint: &Endpoint) -> io::Result<SocketAddr> {
    lookup_host((endpoint.host(), endpoint.port())).await?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses found for '{}'", endpoint.host()))
    })
}

impl Connection {
    /// Opens a connection to the given endpoint.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> io::Result<Self> {
        with_timeout(timeout, "connect", async {
            let addr = resolve(endpoint).await?;
            match endpoint.protocol() {
                Protocol::Tcp => {
                    let stream = TcpStream::connect(addr).await?;
                    stream.set_nodelay(true)?;
                    Ok(Connection::Tcp(stream))
                }
                Protocol::Udp => {
                    let local = if addr.is_ipv4() {
                        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                    } else {
                        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                    };
                    let socket = UdpSocket::bind(local).await?;
                    socket.connect(addr).await?;
                    Ok(Connection::Udp(socket))
                }
                Protocol::Pickled => Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "pickled protocol not implemented, use UDP or TCP",
                )),
            }
        })
        .await
    }

    /// Returns `true` if the connection can still be written to.
    ///
    /// Graphite never writes to its clients, so a TCP stream that has reached end-of-stream, or has anything to read at
    /// all, was closed or reset by the server and must be replaced. Datagram sockets are always reusable.
    pub fn is_reusable(&self) -> bool {
        match self {
            Connection::Tcp(stream) => {
                let mut buf = [0u8; 1];
                matches!(stream.try_read(&mut buf), Err(e) if e.kind() == io::ErrorKind::WouldBlock)
            }
            Connection::Udp(_) => true,
        }
    }

    /// Sends one batch of lines.
    ///
    /// Over TCP, the batch is written to the stream and flushed. Over UDP, the batch is sent as a single datagram.
    pub async fn send(&mut self, buf: &[u8], timeout: Duration) -> io::Result<()> {
        match self {
            Connection::Tcp(stream) => {
                with_timeout(timeout, "send", async {
                    stream.write_all(buf).await?;
                    stream.flush().await
                })
                .await
            }
            Connection::Udp(socket) => {
                let sent = with_timeout(timeout, "send", socket.send(buf)).await?;
                if sent < buf.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("datagram truncated ({sent} of {} bytes sent)", buf.len()),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Flushes any buffered data and, for TCP, shuts down the write half of the stream.
    pub async fn close(self, timeout: Duration) -> io::Result<()> {
        match self {
            Connection::Tcp(mut stream) => with_timeout(timeout, "shutdown", stream.shutdown()).await,
            Connection::Udp(_) => Ok(()),
        }
    }
}
