//! Adapts downstream-produced byte buffers to an OS-writable descriptor,
//! following the write loop in §4.5 of the stream protocol.

use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};

use super::Socket;
use crate::error::Result;
use crate::reactor::{Loop, SourceHandle};
use crate::stream::{Sink, SinkRef, StreamError, Upstream};

pub struct SocketSink<S> {
    socket: Rc<RefCell<S>>,
    pending_input: RefCell<Option<Vec<u8>>>,
    upstream: RefCell<Option<Upstream>>,
    write_source: RefCell<Option<SourceHandle>>,
    closed: RefCell<bool>,
}

impl<S: Socket + 'static> SocketSink<S> {
    pub fn new(socket: Rc<RefCell<S>>, event_loop: &Loop) -> Result<SinkRef<Vec<u8>>> {
        Ok(Self::build(socket, event_loop)?)
    }

    fn build(socket: Rc<RefCell<S>>, event_loop: &Loop) -> Result<Rc<SocketSink<S>>> {
        let fd = socket.borrow().descriptor();
        let stage = Rc::new(SocketSink {
            socket,
            pending_input: RefCell::new(None),
            upstream: RefCell::new(None),
            write_source: RefCell::new(None),
            closed: RefCell::new(false),
        });

        let weak: Weak<SocketSink<S>> = Rc::downgrade(&stage);
        let handle = event_loop.on_writable(fd, move |is_eof| {
            if let Some(this) = weak.upgrade() {
                this.on_writable(is_eof);
            }
        });
        // The write source starts suspended: nothing to write yet.
        *stage.write_source.borrow_mut() = Some(handle);

        Ok(stage)
    }

    fn resume_writing(&self) {
        if let Some(h) = self.write_source.borrow().as_ref() {
            if let Err(e) = h.resume() {
                log::warn!("failed to resume socket write source: {e}");
            }
        }
    }

    fn suspend_writing(&self) {
        if let Some(h) = self.write_source.borrow().as_ref() {
            let _ = h.suspend();
        }
    }

    fn on_writable(&self, is_eof: bool) {
        if is_eof || *self.closed.borrow() {
            self.shutdown();
            return;
        }

        if self.pending_input.borrow().is_none() {
            if let Some(up) = self.upstream.borrow().as_ref() {
                up.request(1);
            }
            self.suspend_writing();
            return;
        }

        if !self.socket.borrow().is_prepared() {
            if let Err(e) = self.socket.borrow_mut().prepare() {
                self.fail(e);
                return;
            }
        }

        let written = {
            let buf = self.pending_input.borrow();
            let buf = buf.as_ref().unwrap();
            self.socket.borrow_mut().write(buf)
        };

        match written {
            Ok(n) => {
                let remaining = {
                    let mut slot = self.pending_input.borrow_mut();
                    let buf = slot.as_mut().unwrap();
                    buf.drain(..n);
                    buf.is_empty()
                };
                if remaining {
                    *self.pending_input.borrow_mut() = None;
                    self.suspend_writing();
                    if let Some(up) = self.upstream.borrow().as_ref() {
                        up.request(1);
                    }
                } else {
                    self.resume_writing();
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted || e.kind() == io::ErrorKind::WouldBlock => {
                self.resume_writing();
            }
            Err(e) if is_broken_pipe(&e) => self.shutdown(),
            Err(e) => self.fail(e),
        }
    }

    /// There is no downstream to deliver a write error to — a sink is a
    /// terminal stage — so the error is logged before closing.
    fn fail(&self, e: io::Error) {
        log::error!("socket sink write failed: {e}");
        self.shutdown();
    }

    fn shutdown(&self) {
        if *self.closed.borrow() {
            return;
        }
        *self.closed.borrow_mut() = true;
        let _ = self.socket.borrow_mut().close();
        if let Some(h) = self.write_source.borrow_mut().take() {
            h.cancel();
        }
    }
}

fn is_broken_pipe(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(code) if code == libc::EPIPE || code == libc::ECONNRESET)
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::os::unix::io::RawFd;
    use std::rc::Rc;

    use super::*;
    use crate::reactor::Loop;

    struct MockSocket {
        // A real pipe write-end so the reactor can register interest in
        // it; the scripted `write_results` decide what `write` reports,
        // independent of whether the pipe itself would accept the bytes.
        fd: RawFd,
        written: Vec<u8>,
        write_results: VecDeque<io::Result<usize>>,
        prepared: bool,
        closed: bool,
    }

    impl MockSocket {
        fn new(write_results: VecDeque<io::Result<usize>>) -> MockSocket {
            let mut fds = [0; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            unsafe { libc::close(fds[0]) };
            MockSocket { fd: fds[1], written: Vec::new(), write_results, prepared: true, closed: false }
        }
    }

    impl Drop for MockSocket {
        fn drop(&mut self) {
            unsafe { libc::close(self.fd) };
        }
    }

    impl Socket for MockSocket {
        fn descriptor(&self) -> RawFd {
            self.fd
        }
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.write_results.pop_front() {
                Some(Ok(n)) => {
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Ok(buf.len()),
            }
        }
        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }
        fn is_prepared(&self) -> bool {
            self.prepared
        }
        fn prepare(&mut self) -> io::Result<()> {
            self.prepared = true;
            Ok(())
        }
    }

    #[test]
    fn partial_write_keeps_remainder_pending() {
        let event_loop = Loop::new("socket-sink-test").unwrap();
        let socket = Rc::new(RefCell::new(MockSocket::new(VecDeque::from(vec![Ok(2), Ok(3)]))));
        let stage = SocketSink::build(socket.clone(), &event_loop).unwrap();
        stage.connect(Upstream::new(|_| {}, || {}));
        stage.next(vec![1, 2, 3, 4, 5]);

        // Drive the write loop directly rather than polling the reactor,
        // since the mock's readiness is scripted, not kernel-driven.
        stage.on_writable(false);
        stage.on_writable(false);

        assert_eq!(socket.borrow().written, vec![1, 2, 3, 4, 5]);
    }
}

impl<S: Socket + 'static> Sink<Vec<u8>> for SocketSink<S> {
    fn connect(&self, upstream: Upstream) {
        *self.upstream.borrow_mut() = Some(upstream);
        self.resume_writing();
    }

    fn next(&self, item: Vec<u8>) {
        debug_assert!(
            self.pending_input.borrow().is_none(),
            "socket sink received next() while a write is still pending"
        );
        *self.pending_input.borrow_mut() = Some(item);
        self.resume_writing();
    }

    fn error(&self, _error: StreamError) {
        self.shutdown();
    }

    fn close(&self) {
        self.shutdown();
    }
}
