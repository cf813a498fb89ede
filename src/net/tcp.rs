//! A nonblocking TCP connection and listener implementing [`Socket`].
//!
//! `TcpConnection` wraps a connecting-or-connected `std::net::TcpStream`.
//! Nonblocking `connect()` returns before the handshake completes, so
//! `prepare()` defers to `SO_ERROR` to learn whether it finished and, if
//! so, with what result — the socket sink calls `prepare()` lazily before
//! its first write, which is exactly when that answer is needed.

use std::io;
use std::net::{self, SocketAddr, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};

use super::Socket;

pub struct TcpConnection {
    inner: net::TcpStream,
    prepared: bool,
}

impl TcpConnection {
    /// Starts a nonblocking connect; the socket is only guaranteed
    /// connected once [`prepare`](Socket::prepare) succeeds.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<TcpConnection> {
        super::ignore_sigpipe();
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no addresses to connect to"))?;
        let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
        let fd = raw_socket(domain, libc::SOCK_STREAM, 0)?;
        let stream = unsafe { <net::TcpStream as std::os::unix::io::FromRawFd>::from_raw_fd(fd) };
        stream.set_nonblocking(true)?;

        match connect_raw(fd, &addr) {
            Ok(()) => Ok(TcpConnection { inner: stream, prepared: true }),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                Ok(TcpConnection { inner: stream, prepared: false })
            }
            Err(e) => Err(e),
        }
    }

    /// Wraps an already-connected stream (e.g. one handed back by
    /// [`TcpListener::accept`]), putting it in non-blocking mode.
    pub fn from_stream(stream: net::TcpStream) -> io::Result<TcpConnection> {
        super::ignore_sigpipe();
        stream.set_nonblocking(true)?;
        Ok(TcpConnection { inner: stream, prepared: true })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.inner.set_nodelay(nodelay)
    }
}

impl Socket for TcpConnection {
    fn descriptor(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        self.inner.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        self.inner.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.inner.shutdown(net::Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already unconnected is not a close failure.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn prepare(&mut self) -> io::Result<()> {
        if self.prepared {
            return Ok(());
        }
        match socket_error(self.inner.as_raw_fd())? {
            0 => {
                self.prepared = true;
                Ok(())
            }
            code => Err(io::Error::from_raw_os_error(code)),
        }
    }
}

pub struct TcpListener {
    inner: net::TcpListener,
}

impl TcpListener {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<TcpListener> {
        let inner = net::TcpListener::bind(addr)?;
        inner.set_nonblocking(true)?;
        Ok(TcpListener { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// A non-blocking accept; `Err(WouldBlock)` means no pending
    /// connection.
    pub fn accept(&self) -> io::Result<(TcpConnection, SocketAddr)> {
        let (stream, addr) = self.inner.accept()?;
        Ok((TcpConnection::from_stream(stream)?, addr))
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

fn raw_socket(domain: i32, ty: i32, protocol: i32) -> io::Result<RawFd> {
    let fd = unsafe { libc::socket(domain, ty, protocol) };
    if fd == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

fn connect_raw(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (raw, len) = socket_addr_to_raw(addr);
    let res = unsafe { libc::connect(fd, &raw as *const _ as *const libc::sockaddr, len) };
    if res == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn socket_addr_to_raw(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    unsafe {
        let mut storage: libc::sockaddr_storage = std::mem::zeroed();
        match addr {
            SocketAddr::V4(v4) => {
                let sin = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in);
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                (storage, std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
            }
            SocketAddr::V6(v6) => {
                let sin6 = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6);
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
                (storage, std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
            }
        }
    }
}

fn socket_error(fd: RawFd) -> io::Result<i32> {
    let mut errno: i32 = 0;
    let mut len = std::mem::size_of::<i32>() as libc::socklen_t;
    let res = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut errno as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if res == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(errno)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn listener_accepts_a_loopback_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpConnection::connect(addr).unwrap();
        // Loopback connects are effectively instantaneous but may still
        // report EINPROGRESS; poll prepare() until it clears.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            match client.prepare() {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => panic!("connect failed: {e}"),
            }
            assert!(std::time::Instant::now() < deadline, "connect timed out");
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            match listener.accept() {
                Ok((_conn, _peer)) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => panic!("accept failed: {e}"),
            }
            assert!(std::time::Instant::now() < deadline, "accept timed out");
        }
    }
}
