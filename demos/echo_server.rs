//! Exercises the TCP facade: one accept loop on the main thread handing
//! each connection off to one of a small pool of worker loops, each
//! running `source -> map(identity) -> sink`.
//!
//! Run with `cargo run --bin echo-server [addr] [worker_count]`, then
//! `nc 127.0.0.1 7070` and type something back at it.

use std::env;
use std::os::unix::io::AsRawFd;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use streamloop::net::{self, TcpConnection, TcpListener};
use streamloop::reactor::Loop;
use streamloop::stream::map;

fn main() {
    env_logger::init();

    let addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7070".to_string());
    let worker_count: usize = env::args().nth(2).and_then(|s| s.parse().ok()).unwrap_or(4);

    let mut workers = Vec::with_capacity(worker_count);
    for i in 0..worker_count {
        let (tx, rx) = mpsc::channel::<TcpConnection>();
        thread::spawn(move || run_worker(i, rx));
        workers.push(tx);
    }

    let listener = TcpListener::bind(&addr).expect("bind failed");
    println!("echo-server listening on {}", listener.local_addr().unwrap());

    let accept_loop = Loop::new("accept").expect("accept loop init failed");
    let accept_fd = listener.as_raw_fd();
    let mut next_worker = 0usize;

    let handle = accept_loop.on_readable(accept_fd, move |_is_eof| {
        while let Ok((conn, peer)) = listener.accept() {
            println!("accepted {}", peer);
            let _ = workers[next_worker].send(conn);
            next_worker = (next_worker + 1) % workers.len();
        }
    });
    handle.resume().expect("accept registration failed");

    accept_loop.run_loop(Some(Duration::from_secs(1))).expect("accept loop crashed");
}

/// Each worker owns its own loop and receives connections assigned to it
/// by the accept loop; the socket becomes the worker's exclusive property
/// from that point on.
fn run_worker(id: usize, inbound: mpsc::Receiver<TcpConnection>) {
    let event_loop = Loop::new(format!("worker-{id}")).expect("worker loop init failed");

    loop {
        while let Ok(conn) = inbound.try_recv() {
            match net::duplex(conn, &event_loop) {
                Ok((source, sink)) => {
                    let echoed = map(source, Ok);
                    echoed.subscribe(sink);
                }
                Err(e) => eprintln!("worker {id}: failed to adapt connection: {e}"),
            }
        }
        event_loop.run(Some(Duration::from_millis(100))).expect("worker loop crashed");
    }
}
