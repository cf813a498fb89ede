//! Adapts an OS-readable descriptor to a demand-driven stream of byte
//! buffers, following the read loop in §4.4 of the stream protocol.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use super::buffer::{BufferRing, DEFAULT_BUFFER_SIZE, DEFAULT_RING_SIZE};
use super::Socket;
use crate::error::{registration_failed, Result};
use crate::reactor::{Loop, SourceHandle};
use crate::stream::{Demand, Sink, SinkRef, Source, SourceRef, Upstream};

pub struct SocketSource<S> {
    socket: Rc<RefCell<S>>,
    downstream: RefCell<Option<SinkRef<Vec<u8>>>>,
    ring: RefCell<BufferRing>,
    pending: RefCell<VecDeque<Vec<u8>>>,
    demand: Cell<Demand>,
    socket_is_empty: Cell<bool>,
    closed: Cell<bool>,
    cancelled: Cell<bool>,
    read_source: RefCell<Option<SourceHandle>>,
}

impl<S: Socket + 'static> SocketSource<S> {
    /// Registers a socket source on `event_loop` using the default ring
    /// (4 buffers of 4 KiB), returning it as a type-erased stream source.
    pub fn new(socket: Rc<RefCell<S>>, event_loop: &Loop) -> Result<SourceRef<Vec<u8>>> {
        Self::with_ring(socket, event_loop, DEFAULT_RING_SIZE, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_ring(
        socket: Rc<RefCell<S>>,
        event_loop: &Loop,
        ring_size: usize,
        buffer_size: usize,
    ) -> Result<SourceRef<Vec<u8>>> {
        Ok(Self::build(socket, event_loop, ring_size, buffer_size)?)
    }

    fn build(
        socket: Rc<RefCell<S>>,
        event_loop: &Loop,
        ring_size: usize,
        buffer_size: usize,
    ) -> Result<Rc<SocketSource<S>>> {
        let fd = socket.borrow().descriptor();
        let stage = Rc::new(SocketSource {
            socket,
            downstream: RefCell::new(None),
            ring: RefCell::new(BufferRing::new(ring_size, buffer_size)),
            pending: RefCell::new(VecDeque::new()),
            demand: Cell::new(Demand::zero()),
            socket_is_empty: Cell::new(false),
            closed: Cell::new(false),
            cancelled: Cell::new(false),
            read_source: RefCell::new(None),
        });

        let weak = Rc::downgrade(&stage);
        let handle = event_loop.on_readable(fd, move |is_eof| {
            if let Some(this) = weak.upgrade() {
                this.on_readiness(is_eof);
            }
        });
        handle.resume().map_err(registration_wrap)?;
        *stage.read_source.borrow_mut() = Some(handle);

        Ok(stage)
    }

    fn on_readiness(self: &Rc<Self>, is_eof: bool) {
        if self.cancelled.get() || is_eof {
            self.close(None);
            return;
        }
        self.socket_is_empty.set(false);
        self.update();
    }

    fn update(self: &Rc<Self>) {
        loop {
            if self.demand.get().is_zero() {
                return;
            }

            let mut delivered_this_pass = false;
            while self.demand.get().get() > 0 {
                let item = self.pending.borrow_mut().pop_front();
                match item {
                    Some(buf) => {
                        let mut demand = self.demand.get();
                        demand.take_one();
                        self.demand.set(demand);
                        if let Some(d) = self.downstream.borrow().as_ref() {
                            d.next(buf);
                        }
                        delivered_this_pass = true;
                    }
                    None => break,
                }
            }

            let has_slot = self.ring.borrow().has_writable_slot();
            if has_slot && !self.socket_is_empty.get() {
                let buffer_size = self.ring.borrow().buffer_size();
                let mut scratch = vec![0u8; buffer_size];
                match self.socket.borrow_mut().read(&mut scratch) {
                    Ok(0) => {
                        self.close(None);
                        return;
                    }
                    Ok(n) => {
                        scratch.truncate(n);
                        self.ring.borrow_mut().lease();
                        self.pending.borrow_mut().push_back(scratch);
                        continue;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.socket_is_empty.set(true);
                        if let Some(h) = self.read_source.borrow().as_ref() {
                            let _ = h.resume();
                        }
                        return;
                    }
                    Err(e) => {
                        self.close(Some(e));
                        return;
                    }
                }
            }

            if !has_slot {
                if let Some(h) = self.read_source.borrow().as_ref() {
                    let _ = h.suspend();
                }
                return;
            }

            if !delivered_this_pass {
                return;
            }
        }
    }

    fn close(self: &Rc<Self>, error: Option<io::Error>) {
        if self.closed.get() {
            return;
        }
        self.closed.set(true);
        let _ = self.socket.borrow_mut().close();
        if let Some(h) = self.read_source.borrow_mut().take() {
            h.cancel();
        }
        if let Some(d) = self.downstream.borrow().as_ref() {
            if let Some(e) = error {
                d.error(Rc::new(crate::error::Error::Io(e)));
            }
            d.close();
        }
    }
}

impl<S: Socket + 'static> Source<Vec<u8>> for SocketSource<S> {
    fn subscribe(self: Rc<Self>, downstream: SinkRef<Vec<u8>>) {
        *self.downstream.borrow_mut() = Some(downstream.clone());
        let weak = Rc::downgrade(&self);
        let weak_cancel = weak.clone();
        downstream.connect(Upstream::new(
            move |n| {
                if let Some(this) = weak.upgrade() {
                    let released = this.ring.borrow_mut().release(n as usize);
                    let mut demand = this.demand.get();
                    demand.add(n);
                    this.demand.set(demand);
                    if released > 0 {
                        this.socket_is_empty.set(false);
                    }
                    this.update();
                }
            },
            move || {
                if let Some(this) = weak_cancel.upgrade() {
                    this.cancelled.set(true);
                    this.close(None);
                }
            },
        ));
    }
}

fn registration_wrap(e: crate::error::Error) -> crate::error::Error {
    match e {
        crate::error::Error::Registration(io_err) => registration_failed("socket source", io_err),
        other => other,
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell as StdRefCell;
    use std::collections::VecDeque;
    use std::os::unix::io::RawFd;

    use super::*;
    use crate::stream::StreamError;

    /// A scripted socket: `reads` is drained one `io::Result<Vec<u8>>` per
    /// `read()` call, independent of the real pipe fd used only so the
    /// reactor has something valid to register.
    struct MockSocket {
        fd: RawFd,
        reads: VecDeque<io::Result<Vec<u8>>>,
    }

    impl MockSocket {
        fn new(reads: VecDeque<io::Result<Vec<u8>>>) -> MockSocket {
            let mut fds = [0; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            unsafe { libc::close(fds[1]) };
            MockSocket { fd: fds[0], reads }
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
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            unimplemented!("source does not write")
        }
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn is_prepared(&self) -> bool {
            true
        }
        fn prepare(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct CollectSink {
        items: Rc<StdRefCell<Vec<Vec<u8>>>>,
    }

    impl Sink<Vec<u8>> for CollectSink {
        fn connect(&self, _upstream: Upstream) {}
        fn next(&self, item: Vec<u8>) {
            self.items.borrow_mut().push(item);
        }
        fn error(&self, _error: StreamError) {}
        fn close(&self) {}
    }

    #[test]
    fn ring_capacity_bounds_reads_ahead_of_demand() {
        let event_loop = Loop::new("socket-source-test").unwrap();
        let reads: VecDeque<io::Result<Vec<u8>>> = (0..10).map(|i| Ok(vec![i])).collect();
        let socket = Rc::new(StdRefCell::new(MockSocket::new(reads)));
        let stage = SocketSource::build(socket, &event_loop, 2, 16).unwrap();

        let items = Rc::new(StdRefCell::new(Vec::new()));
        (stage.clone() as Rc<dyn Source<Vec<u8>>>)
            .subscribe(Rc::new(CollectSink { items: items.clone() }));

        // No demand yet: readiness must not read past the ring capacity.
        stage.on_readiness(false);
        assert_eq!(stage.pending.borrow().len(), 2);
        assert!(items.borrow().is_empty());
    }

    #[test]
    fn releasing_one_slot_unblocks_exactly_one_read() {
        let event_loop = Loop::new("socket-source-test").unwrap();
        let reads: VecDeque<io::Result<Vec<u8>>> = (0..10).map(|i| Ok(vec![i])).collect();
        let socket = Rc::new(StdRefCell::new(MockSocket::new(reads)));
        let stage = SocketSource::build(socket, &event_loop, 2, 16).unwrap();

        let items = Rc::new(StdRefCell::new(Vec::new()));
        let weak_upstream: StdRefCell<Option<Upstream>> = StdRefCell::new(None);
        struct RequestingSink {
            items: Rc<StdRefCell<Vec<Vec<u8>>>>,
            upstream: Rc<StdRefCell<Option<Upstream>>>,
        }
        impl Sink<Vec<u8>> for RequestingSink {
            fn connect(&self, upstream: Upstream) {
                *self.upstream.borrow_mut() = Some(upstream);
            }
            fn next(&self, item: Vec<u8>) {
                self.items.borrow_mut().push(item);
            }
            fn error(&self, _error: StreamError) {}
            fn close(&self) {}
        }
        let upstream_cell = Rc::new(weak_upstream);
        (stage.clone() as Rc<dyn Source<Vec<u8>>>).subscribe(Rc::new(RequestingSink {
            items: items.clone(),
            upstream: upstream_cell.clone(),
        }));

        // Fill the ring to capacity with no demand: nothing is delivered yet.
        stage.on_readiness(false);
        assert_eq!(stage.pending.borrow().len(), 2);

        // Asking for exactly one item releases one ring slot and delivers
        // exactly one buffer, leaving the rest queued.
        upstream_cell.borrow().as_ref().unwrap().request(1);
        assert_eq!(items.borrow().len(), 1);
        assert_eq!(*items.borrow().first().unwrap(), vec![0]);
        assert_eq!(stage.pending.borrow().len(), 1);
    }
}
