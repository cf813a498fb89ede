//! A `File`-backed owning fd wrapper, narrowed to what `eventfd`/`timerfd`
//! actually exercise: construction from a raw fd, fd access for
//! `libc::timerfd_*` calls, and `&FileDesc`'s `Read`/`Write` for the
//! 8-byte counter reads/writes both backings do through a shared
//! reference rather than by value.

use std::io::{self, Read, Write};
use std::fs::File;
use std::os::unix::io::{FromRawFd, AsRawFd, IntoRawFd, RawFd};

#[derive(Debug)]
pub struct FileDesc(File);

impl FileDesc {
    pub unsafe fn new(fd: RawFd) -> Self {
        FileDesc(File::from_raw_fd(fd))
    }
}

impl FromRawFd for FileDesc {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        FileDesc(File::from_raw_fd(fd))
    }
}

impl AsRawFd for FileDesc {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl IntoRawFd for FileDesc {
    fn into_raw_fd(self) -> RawFd {
        self.0.into_raw_fd()
    }
}

impl Read for &FileDesc {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.0).read(buf)
    }
}

impl Write for &FileDesc {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
