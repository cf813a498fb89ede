//! Adapts any type with OS-descriptor read/write semantics to the
//! demand-driven stream protocol. A [`Socket`] is deliberately narrow —
//! `net::TcpConnection` is the only implementation in this crate, but the
//! trait lets other descriptor kinds (pipes, a mock for tests) plug into
//! the same source/sink machinery.

use std::os::unix::io::RawFd;

pub mod buffer;
pub mod sink;
pub mod source;

pub use buffer::BufferRing;
pub use sink::SocketSink;
pub use source::SocketSource;

/// The minimal non-blocking descriptor interface the source/sink
/// machinery needs. Implementors are expected to have already put the
/// descriptor in non-blocking mode.
pub trait Socket {
    fn descriptor(&self) -> RawFd;

    /// A non-blocking read; `Err(WouldBlock)` means no data is ready yet.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// A non-blocking write; `Err(WouldBlock)` means the kernel buffer is
    /// full.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize>;

    fn close(&mut self) -> std::io::Result<()>;

    /// Whether one-time setup (e.g. waiting out a nonblocking `connect`)
    /// has completed.
    fn is_prepared(&self) -> bool;

    /// Performs one-time setup; called lazily before the first write.
    fn prepare(&mut self) -> std::io::Result<()>;
}

/// Builds a source stream of `Vec<u8>` and a sink for `Vec<u8>` sharing
/// one socket, for protocols that read and write the same connection
/// concurrently.
pub fn duplex<S: Socket + 'static>(
    socket: S,
    event_loop: &crate::reactor::Loop,
) -> crate::error::Result<(crate::stream::SourceRef<Vec<u8>>, crate::stream::SinkRef<Vec<u8>>)> {
    use std::cell::RefCell;
    use std::rc::Rc;

    let socket = Rc::new(RefCell::new(socket));
    let source = SocketSource::new(socket.clone(), event_loop)?;
    let sink = SocketSink::new(socket, event_loop)?;
    Ok((source, sink))
}
