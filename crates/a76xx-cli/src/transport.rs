//! TCP bridge to the modem's serial port.
//!
//! Serial-to-TCP bridges (ser2net, an ESP32 passthrough) expose the UART as a
//! plain byte stream. The socket is non-blocking; reads are pulled into a
//! local buffer whenever the engine asks how much is available.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use a76xx_at::Transport;
use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 512;

/// [`Transport`] over a TCP connection.
pub struct TcpTransport {
    stream: TcpStream,
    buffer: BytesMut,
    closed: bool,
}

impl TcpTransport {
    /// Connect to `address`, giving up after `timeout`.
    pub fn connect(address: &str, timeout: Duration) -> io::Result<Self> {
        let mut last_err = io::Error::new(ErrorKind::NotFound, "address resolved to nothing");
        for addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    debug!("Connected to modem bridge at {}", addr);
                    return Self::from_stream(stream);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(TcpTransport {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            closed: false,
        })
    }

    /// Whether the peer closed the connection.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Pull whatever the socket has ready into the buffer.
    fn fill(&mut self) {
        if self.closed {
            return;
        }
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    warn!("Modem bridge closed the connection");
                    self.closed = true;
                    return;
                }
                Ok(n) => {
                    trace!("rx {}", String::from_utf8_lossy(&chunk[..n]).escape_debug());
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        return;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Modem bridge read failed: {}", e);
                    self.closed = true;
                    return;
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn available(&mut self) -> usize {
        if self.buffer.is_empty() {
            self.fill();
        }
        self.buffer.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.buffer.is_empty() {
            self.fill();
        }
        if self.buffer.has_remaining() {
            Some(self.buffer.get_u8())
        } else {
            None
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            match self.stream.write(rest) {
                Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "bridge closed")),
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        loop {
            match self.stream.flush() {
                Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::yield_now(),
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    fn pair() -> (TcpTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let transport = TcpTransport::connect(&addr, Duration::from_secs(1)).unwrap();
        let (peer, _) = listener.accept().unwrap();
        (transport, peer)
    }

    fn wait_available(transport: &mut TcpTransport, n: usize) {
        let start = Instant::now();
        while transport.available() < n && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_bytes_flow_both_ways() {
        let (mut transport, mut peer) = pair();
        transport.write(b"AT\r\n").unwrap();
        transport.flush().unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"AT\r\n");

        peer.write_all(b"OK\r\n").unwrap();
        wait_available(&mut transport, 4);
        let read: Vec<u8> = std::iter::from_fn(|| transport.read_byte()).take(4).collect();
        assert_eq!(read, b"OK\r\n");
    }

    #[test]
    fn test_empty_read_does_not_block() {
        let (mut transport, _peer) = pair();
        assert_eq!(transport.available(), 0);
        assert_eq!(transport.read_byte(), None);
        assert!(!transport.is_closed());
    }

    #[test]
    fn test_peer_close_detected() {
        let (mut transport, peer) = pair();
        drop(peer);
        let start = Instant::now();
        while !transport.is_closed() && start.elapsed() < Duration::from_secs(2) {
            transport.available();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(transport.is_closed());
    }
}
