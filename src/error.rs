//! Error taxonomy shared across the reactor, promise, and stream layers.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// The kinds of failure the core can surface.
///
/// `WouldBlock` is deliberately absent: it is a status, signalled by
/// `io::ErrorKind::WouldBlock` at the point a non-blocking read/write is
/// attempted, never wrapped in this type. `PromiseAlreadyCompleted` is
/// likewise never constructed in normal operation — a second completion is
/// silently dropped rather than reported.
#[derive(Debug)]
pub enum Error {
    /// Could not obtain a kqueue/epoll handle.
    LoopInit(io::Error),
    /// The kernel rejected an add/modify/delete against a notifier.
    Registration(io::Error),
    /// A socket read/write failed for a reason other than interrupted or
    /// would-block.
    Io(io::Error),
    /// `blocking_await` expired before the promise completed.
    Timeout,
    /// A stream-protocol invariant was broken by caller code (e.g.
    /// delivering `next` with no outstanding demand).
    StreamContract(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LoopInit(e) => write!(f, "failed to initialize event loop: {}", e),
            Error::Registration(e) => write!(f, "kernel registration failed: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Timeout => write!(f, "timed out waiting for completion"),
            Error::StreamContract(msg) => write!(f, "stream contract violated: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::LoopInit(e) | Error::Registration(e) | Error::Io(e) => Some(e),
            Error::Timeout | Error::StreamContract(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Panics in debug builds, logs and returns in release — the policy for
/// registration failures per the error-handling design: "fatal in
/// development builds, logged and skipped in release."
#[cfg_attr(not(debug_assertions), allow(unused_variables))]
pub(crate) fn registration_failed(label: &str, err: io::Error) -> Error {
    if cfg!(debug_assertions) {
        panic!("{}: kernel registration failed: {}", label, err);
    } else {
        log::error!("{}: kernel registration failed: {}", label, err);
        Error::Registration(err)
    }
}

/// Panics in debug builds, logs in release — the policy for stream-contract
/// violations ("fatal in debug" per the error taxonomy).
pub(crate) fn stream_contract(msg: &'static str) -> Error {
    if cfg!(debug_assertions) {
        panic!("stream contract violated: {}", msg);
    } else {
        log::error!("stream contract violated: {}", msg);
        Error::StreamContract(msg)
    }
}
