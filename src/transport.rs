//! The byte or datagram pipe a session runs over.

use std::io::{self, Read, Write};
use std::net::{TcpStream, UdpSocket};

/// Duplex transport consumed by the record layer.
///
/// For datagram transport every `send` is one datagram and every `recv`
/// returns one datagram. For stream transport `recv` returning 0 means the
/// peer closed the stream.
///
/// `io::ErrorKind::WouldBlock` and `io::ErrorKind::TimedOut` tell the
/// session to come back later.
pub trait Transport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// A connected socket.
impl Transport for UdpSocket {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf)
    }
}

impl Transport for TcpStream {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).send(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }
}
