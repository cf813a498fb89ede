//! Platform glue: one readiness notifier backend per OS family, plus the
//! small file-descriptor wrappers shared by both.
//!
//! Everything above this module talks to [`Notifier`], [`Readiness`] and
//! [`RawEvent`] only; the `epoll`/`kqueue` split never leaks past `sys`.

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)? )) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg),*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod fd;
pub mod waker;

pub use self::waker::Waker;

#[cfg(target_os = "linux")]
pub mod eventfd;
#[cfg(target_os = "linux")]
pub mod timerfd;

#[cfg(target_os = "linux")]
pub mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;

#[cfg(target_os = "linux")]
pub use self::epoll::{Events, Notifier};
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use self::kqueue::{Events, Notifier};

/// Readiness reported by the kernel for a single registration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hup: bool,
}

impl Readiness {
    pub fn readable() -> Self {
        Readiness { readable: true, ..Default::default() }
    }

    pub fn writable() -> Self {
        Readiness { writable: true, ..Default::default() }
    }
}

/// What a registration is interested in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    /// A one-shot timer or next-tick wakeup; readable when it fires.
    Timer,
}

/// A single readiness notification recovered from a poll cycle, carrying
/// back the opaque key handed to the notifier at registration time.
#[derive(Copy, Clone, Debug)]
pub struct RawEvent {
    pub key: u64,
    pub readiness: Readiness,
}
