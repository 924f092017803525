//! Byte transport abstraction.
//!
//! The engine only needs four operations from the serial link. Platform code
//! (a UART driver, a TCP bridge, a test double) provides them.

use std::io;

/// A duplex byte stream connected to the modem.
pub trait Transport {
    /// Number of bytes that can be read without blocking.
    fn available(&mut self) -> usize;

    /// Read a single byte.
    ///
    /// Callers check [`available`](Transport::available) first; `None` is
    /// returned when nothing is buffered.
    fn read_byte(&mut self) -> Option<u8>;

    /// Write bytes to the modem. Data may be buffered until [`flush`](Transport::flush).
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush buffered output.
    fn flush(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn available(&mut self) -> usize {
        (**self).available()
    }

    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn available(&mut self) -> usize {
        (**self).available()
    }

    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}
