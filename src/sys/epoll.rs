//! Linux readiness backend on top of `epoll(7)`.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use std::{cmp, i32};

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP};

use super::{Interest, RawEvent, Readiness};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Thin wrapper over a single `epoll_create1` handle.
///
/// Every [`crate::reactor::Reactor`] owns exactly one `Notifier`; the `id`
/// lets fd-like sources assert they were registered with the loop that
/// currently owns them (see `SelectorId` in the teacher's net module).
pub struct Notifier {
    id: usize,
    epfd: RawFd,
}

impl Notifier {
    pub fn new() -> io::Result<Notifier> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Notifier { id, epfd })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// `oneshot` registers with `EPOLLONESHOT`; used for next-tick and
    /// timer sources, which must fire exactly once per arm.
    pub fn add(&self, fd: RawFd, key: u64, interest: Interest, oneshot: bool) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest, oneshot),
            u64: key,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event))?;
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, key: u64, interest: Interest, oneshot: bool) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_to_epoll(interest, oneshot),
            u64: key,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut event))?;
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        match syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut event)) {
            Ok(_) => Ok(()),
            // cancel() is idempotent: a fd already gone is not an error.
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|d| cmp::min(d.as_millis(), i32::MAX as u128) as i32)
            .unwrap_or(-1);

        loop {
            let cnt = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    events.raw.as_mut_ptr(),
                    events.raw.capacity() as i32,
                    timeout_ms,
                )
            };

            if cnt == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            unsafe { events.raw.set_len(cnt as usize) };
            return Ok(());
        }
    }
}

fn interest_to_epoll(interest: Interest, oneshot: bool) -> u32 {
    let mut kind = match interest {
        Interest::Read => EPOLLIN | EPOLLRDHUP,
        Interest::Write => EPOLLOUT,
        Interest::Timer => EPOLLIN,
    };

    if oneshot {
        kind |= EPOLLONESHOT;
    }

    kind as u32
}

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

pub struct Events {
    raw: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Events {
        Events { raw: Vec::with_capacity(cap) }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RawEvent> + '_ {
        self.raw.iter().map(|ev| {
            let flags = ev.events as i32;
            RawEvent {
                key: ev.u64,
                readiness: Readiness {
                    readable: flags & EPOLLIN != 0,
                    writable: flags & EPOLLOUT != 0,
                    error: flags & EPOLLERR != 0,
                    hup: flags & (EPOLLHUP | EPOLLRDHUP) != 0,
                },
            }
        })
    }
}
