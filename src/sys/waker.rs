//! A cross-thread wakeup a loop can register as a normal readable source.
//!
//! Linux gets a plain `eventfd`; everything else falls back to the
//! self-pipe trick, since `write(2)` to either is documented safe from any
//! thread without additional synchronization.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

#[cfg(target_os = "linux")]
pub struct Waker(super::eventfd::EventFd);

#[cfg(target_os = "linux")]
impl Waker {
    pub fn new() -> io::Result<Waker> {
        Ok(Waker(super::eventfd::EventFd::new()?))
    }

    pub fn wake(&self) -> io::Result<()> {
        self.0.notify()
    }

    pub fn drain(&self) -> io::Result<()> {
        self.0.drain()
    }
}

#[cfg(target_os = "linux")]
impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

#[cfg(not(target_os = "linux"))]
pub struct Waker {
    read_fd: RawFd,
    write_fd: RawFd,
}

#[cfg(not(target_os = "linux"))]
impl Waker {
    pub fn new() -> io::Result<Waker> {
        let mut fds = [0; 2];
        syscall!(pipe(fds.as_mut_ptr()))?;
        let (read_fd, write_fd) = (fds[0], fds[1]);

        for fd in [read_fd, write_fd] {
            syscall!(fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
            let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
            syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
        }

        Ok(Waker { read_fd, write_fd })
    }

    pub fn wake(&self) -> io::Result<()> {
        let byte = 1u8;
        let res = unsafe { libc::write(self.write_fd, &byte as *const u8 as *const _, 1) };
        if res == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn drain(&self) -> io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            let res = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
            if res == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(());
                }
                return Err(err);
            }
            if res == 0 || (res as usize) < buf.len() {
                return Ok(());
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.read_fd
    }
}

#[cfg(not(target_os = "linux"))]
impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

#[cfg(test)]
mod test {
    use super::Waker;

    #[test]
    fn wake_and_drain() {
        let waker = Waker::new().unwrap();
        waker.wake().unwrap();
        waker.drain().unwrap();
    }
}
