//! Integration test for the "back-pressure halt" scenario: a starved sink
//! (demand 0) must not receive any buffers no matter how much the peer
//! has sent, and asking for exactly one item must deliver exactly one.

use std::cell::RefCell;
use std::io::Write;
use std::net::TcpStream as StdTcpStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use streamloop::net::TcpListener;
use streamloop::reactor::Loop;
use streamloop::socket::SocketSource;
use streamloop::stream::{Sink, Source, StreamError, Upstream};

struct StarvedSink {
    items: Rc<RefCell<Vec<Vec<u8>>>>,
    upstream: RefCell<Option<Upstream>>,
}

impl Sink<Vec<u8>> for StarvedSink {
    fn connect(&self, upstream: Upstream) {
        // No request() here: the sink starts with zero demand.
        *self.upstream.borrow_mut() = Some(upstream);
    }
    fn next(&self, item: Vec<u8>) {
        self.items.borrow_mut().push(item);
    }
    fn error(&self, _error: StreamError) {}
    fn close(&self) {}
}

#[test]
fn starved_sink_gets_nothing_until_it_requests_exactly_one() {
    let event_loop = Loop::new("backpressure-test").unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let payload: Vec<u8> = (0..131_072u32).map(|i| (i % 256) as u8).collect();
    let payload_for_client = payload.clone();
    let client = thread::spawn(move || {
        let mut stream = StdTcpStream::connect(addr).unwrap();
        stream.write_all(&payload_for_client).unwrap();
        // Keep the connection open; the server never reads past its ring,
        // so this thread simply idles once the write completes.
        thread::sleep(Duration::from_millis(500));
    });

    let deadline = Instant::now() + Duration::from_secs(2);
    let (conn, _peer) = loop {
        match listener.accept() {
            Ok(pair) => break pair,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                event_loop.run(Some(Duration::from_millis(20))).unwrap();
            }
            Err(e) => panic!("accept failed: {e}"),
        }
        assert!(Instant::now() < deadline, "accept timed out");
    };

    let socket = Rc::new(RefCell::new(conn));
    let source = SocketSource::new(socket, &event_loop).unwrap();
    let items = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::new(StarvedSink { items: items.clone(), upstream: RefCell::new(None) });
    source.subscribe(sink.clone());

    // Let the server read as much as its ring allows while demand is zero.
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        event_loop.run(Some(Duration::from_millis(20))).unwrap();
    }
    assert!(items.borrow().is_empty(), "starved sink must not receive any buffer");

    sink.upstream.borrow().as_ref().unwrap().request(1);
    let deadline = Instant::now() + Duration::from_secs(2);
    while items.borrow().is_empty() && Instant::now() < deadline {
        event_loop.run(Some(Duration::from_millis(20))).unwrap();
    }

    let delivered = items.borrow();
    assert_eq!(delivered.len(), 1, "requesting one must deliver exactly one buffer");
    let buf = &delivered[0];
    assert!(!buf.is_empty() && buf.len() <= 4096);
    assert_eq!(buf.as_slice(), &payload[..buf.len()]);

    client.join().unwrap();
}
