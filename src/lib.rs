//! An event loop over kqueue/epoll, a back-pressured stream protocol, and
//! a promise/future layer for building non-blocking network services.
//!
//! ## Usage
//!
//! ```no_run
//! use streamloop::reactor::Loop;
//! use streamloop::net;
//!
//! let event_loop = Loop::new("worker").unwrap();
//! let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
//! let accept_fd = std::os::unix::io::AsRawFd::as_raw_fd(&listener);
//!
//! let accept_loop = event_loop.clone();
//! let handle = event_loop.on_readable(accept_fd, move |_is_eof| {
//!     while let Ok((conn, _addr)) = listener.accept() {
//!         let (source, sink) = net::duplex(conn, &accept_loop).unwrap();
//!         // wire `source`/`sink` into a stream pipeline here.
//!         let _ = (source, sink);
//!     }
//! });
//! handle.resume().unwrap();
//! event_loop.run(None).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod file;
pub mod net;
pub mod promise;
pub mod reactor;
pub mod socket;
pub mod stream;
mod sys;

pub use error::{Error, Result};
pub use reactor::{Loop, SourceHandle};
