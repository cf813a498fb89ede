//! Integration test for the "echo" scenario: a loopback TCP server whose
//! pipeline is `source -> map(identity) -> sink`, and the invariant that
//! a client disconnect yields exactly one `close` on the server side.

use std::cell::Cell;
use std::io::{Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use streamloop::net::{self, TcpListener};
use streamloop::reactor::Loop;
use streamloop::stream::{map, Sink, SinkRef, Source, StreamError, Upstream};

struct CountingSink<T> {
    inner: SinkRef<T>,
    closes: Rc<Cell<u32>>,
}

impl<T> Sink<T> for CountingSink<T> {
    fn connect(&self, upstream: Upstream) {
        self.inner.connect(upstream);
    }
    fn next(&self, item: T) {
        self.inner.next(item);
    }
    fn error(&self, error: StreamError) {
        self.inner.error(error);
    }
    fn close(&self) {
        self.closes.set(self.closes.get() + 1);
        self.inner.close();
    }
}

fn run_until(event_loop: &Loop, deadline: Instant, mut done: impl FnMut() -> bool) {
    while !done() && Instant::now() < deadline {
        event_loop.run(Some(Duration::from_millis(50))).unwrap();
    }
}

#[test]
fn echo_roundtrip_and_single_close_on_client_disconnect() {
    let event_loop = Loop::new("echo-test").unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_fd = listener.as_raw_fd();

    let closes = Rc::new(Cell::new(0u32));
    let closes_server = closes.clone();
    let accept_loop = event_loop.clone();
    let accept_handle = event_loop.on_readable(accept_fd, move |_is_eof| {
        while let Ok((conn, _peer)) = listener.accept() {
            let (source, sink) = net::duplex(conn, &accept_loop).unwrap();
            let echoed = map(source, Ok);
            echoed.subscribe(Rc::new(CountingSink { inner: sink, closes: closes_server.clone() }));
        }
    });
    accept_handle.resume().unwrap();

    let client = thread::spawn(move || {
        let mut stream = StdTcpStream::connect(addr).unwrap();
        stream.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        drop(stream);
        buf
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    run_until(&event_loop, deadline, || client.is_finished());
    let echoed = client.join().unwrap();
    assert_eq!(&echoed, b"ping");

    // Give the server loop a chance to observe the client's disconnect.
    let deadline = Instant::now() + Duration::from_secs(2);
    run_until(&event_loop, deadline, || closes.get() > 0);

    assert_eq!(closes.get(), 1, "expected exactly one close on disconnect");
}
