//! TCP adapters wired to the socket source/sink machinery. Like the file
//! reader and directory-config helper, this module is an external
//! collaborator of the core: it only consumes the `Socket` adapter and the
//! event loop, never the reverse.

pub mod tcp;

pub use tcp::{TcpConnection, TcpListener};

use std::sync::Once;

use crate::error::Result;
use crate::reactor::Loop;
use crate::socket::Socket;
use crate::stream::{SinkRef, SourceRef};

static IGNORE_SIGPIPE: Once = Once::new();

/// A broken pipe must surface as `EPIPE` from `write(2)`, not as the
/// default-disposition `SIGPIPE` killing the process; every TCP
/// constructor in this module runs this once before touching a socket.
fn ignore_sigpipe() {
    IGNORE_SIGPIPE.call_once(|| unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    });
}

/// Starts a connection to `addr` and wires it into a source/sink pair on
/// `event_loop`. The connection may still be mid-handshake when this
/// returns; the socket sink's lazy `prepare()` resolves it on first write.
pub fn connect(
    addr: impl std::net::ToSocketAddrs,
    event_loop: &Loop,
) -> std::io::Result<(SourceRef<Vec<u8>>, SinkRef<Vec<u8>>)> {
    let conn = TcpConnection::connect(addr)?;
    duplex(conn, event_loop).map_err(to_io_error)
}

/// Wraps an accepted or hand-built [`TcpConnection`] as a duplex byte
/// stream.
pub fn duplex(
    conn: TcpConnection,
    event_loop: &Loop,
) -> Result<(SourceRef<Vec<u8>>, SinkRef<Vec<u8>>)> {
    crate::socket::duplex(conn, event_loop)
}

fn to_io_error(e: crate::error::Error) -> std::io::Error {
    match e {
        crate::error::Error::Io(e) | crate::error::Error::Registration(e) | crate::error::Error::LoopInit(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
    }
}
