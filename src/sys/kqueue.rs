//! BSD/macOS readiness backend on top of `kqueue(2)`.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Interest, RawEvent, Readiness};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Identifies a kqueue registration: sockets/pipes are keyed by fd, timers
/// and next-tick wakeups are keyed by a synthetic ident handed out here
/// (kqueue multiplexes `EVFILT_TIMER`/`EVFILT_USER` idents in their own
/// namespace, separate from `EVFILT_READ`/`EVFILT_WRITE`).
static NEXT_IDENT: AtomicUsize = AtomicUsize::new(1);

pub fn next_ident() -> usize {
    NEXT_IDENT.fetch_add(1, Ordering::Relaxed)
}

pub struct Notifier {
    id: usize,
    kq: RawFd,
}

impl Notifier {
    pub fn new() -> io::Result<Notifier> {
        let kq = syscall!(kqueue())?;
        syscall!(fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC))?;
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Notifier { id, kq })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Registers a readable/writable interest on a real file descriptor.
    pub fn add(&self, fd: RawFd, key: u64, interest: Interest, oneshot: bool) -> io::Result<()> {
        self.modify(fd, key, interest, oneshot)
    }

    pub fn modify(&self, fd: RawFd, key: u64, interest: Interest, oneshot: bool) -> io::Result<()> {
        let filter = match interest {
            Interest::Read => libc::EVFILT_READ,
            Interest::Write => libc::EVFILT_WRITE,
            Interest::Timer => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "timer sources must use add_timer/arm_next_tick, not add",
                ))
            }
        };

        let mut flags = libc::EV_ADD | libc::EV_RECEIPT;
        if oneshot {
            flags |= libc::EV_ONESHOT;
        }

        self.apply_change(fd as libc::uintptr_t, filter, flags, 0, key)
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        for filter in [libc::EVFILT_READ, libc::EVFILT_WRITE] {
            let flags = libc::EV_DELETE | libc::EV_RECEIPT;
            match self.apply_change(fd as libc::uintptr_t, filter, flags, 0, 0) {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Arms a one-shot `EVFILT_TIMER` identified by `ident`, firing after
    /// `duration` (milliseconds, per `NOTE_MSECONDS`).
    pub fn add_timer(&self, ident: usize, key: u64, duration: Duration) -> io::Result<()> {
        let millis = duration.as_millis().min(i64::MAX as u128) as isize;
        self.apply_change(
            ident as libc::uintptr_t,
            libc::EVFILT_TIMER,
            libc::EV_ADD | libc::EV_ONESHOT | libc::EV_RECEIPT,
            millis as isize,
            key,
        )
    }

    pub fn delete_timer(&self, ident: usize) -> io::Result<()> {
        match self.apply_change(
            ident as libc::uintptr_t,
            libc::EVFILT_TIMER,
            libc::EV_DELETE | libc::EV_RECEIPT,
            0,
            0,
        ) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Arms a one-shot `EVFILT_USER` wakeup identified by `ident`; the
    /// next call to `wait` that observes it will report it readable.
    pub fn add_next_tick(&self, ident: usize, key: u64) -> io::Result<()> {
        self.apply_change(
            ident as libc::uintptr_t,
            libc::EVFILT_USER,
            libc::EV_ADD | libc::EV_ONESHOT | libc::EV_RECEIPT,
            0,
            key,
        )?;
        self.apply_change(
            ident as libc::uintptr_t,
            libc::EVFILT_USER,
            libc::EV_RECEIPT,
            libc::NOTE_TRIGGER as isize,
            key,
        )
    }

    pub fn delete_next_tick(&self, ident: usize) -> io::Result<()> {
        match self.apply_change(
            ident as libc::uintptr_t,
            libc::EVFILT_USER,
            libc::EV_DELETE | libc::EV_RECEIPT,
            0,
            0,
        ) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn apply_change(
        &self,
        ident: libc::uintptr_t,
        filter: i16,
        flags: u16,
        fflags_or_data: isize,
        key: u64,
    ) -> io::Result<()> {
        let (fflags, data) = if filter == libc::EVFILT_USER {
            (fflags_or_data as u32, 0)
        } else {
            (0u32, fflags_or_data)
        };

        let mut change = libc::kevent {
            ident,
            filter,
            flags,
            fflags,
            data,
            udata: key as *mut libc::c_void,
        };

        syscall!(kevent(self.kq, &change, 1, &mut change, 1, ptr::null()))?;

        if change.flags & libc::EV_ERROR != 0 && change.data != 0 {
            let errno = change.data as i32;
            if errno != libc::ENOENT {
                return Err(io::Error::from_raw_os_error(errno));
            }
        }

        Ok(())
    }

    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });

        loop {
            let cnt = unsafe {
                libc::kevent(
                    self.kq,
                    ptr::null(),
                    0,
                    events.raw.as_mut_ptr(),
                    events.raw.capacity() as i32,
                    ts.as_ref().map_or(ptr::null(), |t| t as *const _),
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

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.kq
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}

pub struct Events {
    raw: Vec<libc::kevent>,
}

unsafe impl Send for Events {}

impl Events {
    pub fn with_capacity(cap: usize) -> Events {
        let zeroed = libc::kevent {
            ident: 0,
            filter: 0,
            flags: 0,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        Events { raw: vec![zeroed; cap] }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RawEvent> + '_ {
        self.raw.iter().map(|ev| {
            let mut readiness = Readiness::default();

            match ev.filter {
                libc::EVFILT_READ => readiness.readable = true,
                libc::EVFILT_WRITE => readiness.writable = true,
                libc::EVFILT_TIMER | libc::EVFILT_USER => readiness.readable = true,
                _ => {}
            }

            if ev.flags & libc::EV_EOF != 0 {
                readiness.hup = true;
            }
            if ev.flags & libc::EV_ERROR != 0 {
                readiness.error = true;
            }

            RawEvent { key: ev.udata as u64, readiness }
        })
    }
}
