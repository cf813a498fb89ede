//! Linux `eventfd(2)`, used by the reactor to wake a sleeping `wait()`
//! from another thread and to carry cross-thread promise completions.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use super::fd::FileDesc;

pub const EFD_CLOEXEC: i32 = libc::EFD_CLOEXEC;
pub const EFD_NONBLOCK: i32 = libc::EFD_NONBLOCK;

#[derive(Debug)]
pub struct EventFd {
    inner: FileDesc,
}

impl EventFd {
    pub fn new() -> io::Result<EventFd> {
        EventFd::with_options(0, EFD_CLOEXEC | EFD_NONBLOCK)
    }

    pub fn with_options(initval: u32, flags: i32) -> io::Result<EventFd> {
        let eventfd = syscall!(eventfd(initval, flags))?;
        Ok(EventFd { inner: unsafe { FileDesc::new(eventfd) } })
    }

    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    pub fn write(&self, val: u64) -> io::Result<()> {
        let buf = val.to_ne_bytes();
        (&self.inner).write_all(&buf)
    }

    /// Drains the counter to zero, ignoring `WouldBlock` (nothing pending).
    pub fn drain(&self) -> io::Result<()> {
        match self.read() {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Bumps the counter by one, ignoring `WouldBlock` (counter saturated,
    /// which only happens after ~2^64 unconsumed wakeups).
    pub fn notify(&self) -> io::Result<()> {
        match self.write(1) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl FromRawFd for EventFd {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        EventFd { inner: FileDesc::new(fd) }
    }
}

impl IntoRawFd for EventFd {
    fn into_raw_fd(self) -> RawFd {
        self.inner.into_raw_fd()
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
