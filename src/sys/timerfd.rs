//! Linux `timerfd(2)`, used for one-shot timer event sources.
//!
//! `Reactor::on_timeout` only ever arms a single relative expiration per
//! registration (the reactor re-arms on each fire rather than relying on
//! `it_interval`), but `settime`/`gettime` still expose the full
//! `timerfd_settime(2)` surface for direct use.

use std::convert::TryInto;
use std::fmt;
use std::io::{self, Read};
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::time::Duration;

use super::fd::FileDesc;

#[derive(Clone, Copy)]
#[repr(i32)]
pub enum Clock {
    Realtime = libc::CLOCK_REALTIME,
    Monotonic = libc::CLOCK_MONOTONIC,
    Boottime = libc::CLOCK_BOOTTIME,
    RealtimeAlarm = libc::CLOCK_REALTIME_ALARM,
    BoottimeAlarm = libc::CLOCK_BOOTTIME_ALARM,
}

impl Clock {
    pub fn clock_name(&self) -> &'static str {
        match self {
            Clock::Realtime => "CLOCK_REALTIME",
            Clock::RealtimeAlarm => "CLOCK_REALTIME_ALARM",
            Clock::Monotonic => "CLOCK_MONOTONIC",
            Clock::Boottime => "CLOCK_BOOTTIME",
            Clock::BoottimeAlarm => "CLOCK_BOOTTIME_ALARM",
        }
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.clock_name())
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", *self as i32, self.clock_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetTimeFlags {
    Default,
    Abstime,
    TimerCancelOnSet,
}

pub const TFD_CLOEXEC: i32 = libc::TFD_CLOEXEC;
pub const TFD_NONBLOCK: i32 = libc::TFD_NONBLOCK;

const TFD_TIMER_ABSTIME: i32 = libc::TFD_TIMER_ABSTIME;
const TFD_TIMER_CANCEL_ON_SET: i32 = 0o0000002;

#[derive(Debug)]
pub struct TimerFd {
    inner: FileDesc,
}

#[derive(Debug, Clone)]
pub struct TimerSpec {
    pub interval: Duration,
    pub value: Duration,
}

impl TimerFd {
    /// A disarmed, non-blocking, monotonic-clock timerfd — the reactor's
    /// one-shot timer sources never need wall-clock semantics.
    pub fn new() -> io::Result<TimerFd> {
        TimerFd::create(Clock::Monotonic, TFD_CLOEXEC | TFD_NONBLOCK)
    }

    pub fn create(clock: Clock, flags: i32) -> io::Result<TimerFd> {
        let timerfd = syscall!(timerfd_create(clock as i32, flags))?;
        Ok(TimerFd { inner: unsafe { FileDesc::new(timerfd) } })
    }

    pub fn settime(&self, value: TimerSpec, flags: SetTimeFlags) -> io::Result<TimerSpec> {
        let new_value = libc::itimerspec {
            it_interval: duration_to_timespec(value.interval),
            it_value: duration_to_timespec(value.value),
        };

        let mut old_value: libc::itimerspec = unsafe { mem::zeroed() };

        let flags = match flags {
            SetTimeFlags::Default => 0,
            SetTimeFlags::Abstime => TFD_TIMER_ABSTIME,
            SetTimeFlags::TimerCancelOnSet => TFD_TIMER_ABSTIME | TFD_TIMER_CANCEL_ON_SET,
        };

        syscall!(timerfd_settime(self.inner.as_raw_fd(), flags, &new_value, &mut old_value))?;

        Ok(TimerSpec {
            interval: timespec_to_duration(old_value.it_interval),
            value: timespec_to_duration(old_value.it_value),
        })
    }

    pub fn gettime(&self) -> io::Result<TimerSpec> {
        let mut itimerspec: libc::itimerspec = unsafe { mem::zeroed() };
        syscall!(timerfd_gettime(self.inner.as_raw_fd(), &mut itimerspec))?;

        Ok(TimerSpec {
            interval: timespec_to_duration(itimerspec.it_interval),
            value: timespec_to_duration(itimerspec.it_value),
        })
    }

    /// Arms a one-shot expiration after `duration`, disabling periodic
    /// reload (`it_interval` zero).
    pub fn arm(&self, duration: Duration) -> io::Result<()> {
        self.settime(
            TimerSpec { interval: Duration::new(0, 0), value: duration },
            SetTimeFlags::Default,
        )
        .map(|_| ())
    }

    pub fn disarm(&self) -> io::Result<()> {
        self.arm(Duration::new(0, 0))
    }

    /// Consumes the expiration counter; returns `WouldBlock` if the timer
    /// has not fired since the last read.
    pub fn read_expirations(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }
}

fn duration_to_timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs().try_into().unwrap(),
        tv_nsec: duration.subsec_nanos().try_into().unwrap(),
    }
}

fn timespec_to_duration(timespec: libc::timespec) -> Duration {
    Duration::new(timespec.tv_sec as u64, timespec.tv_nsec as u32)
}

impl FromRawFd for TimerFd {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        TimerFd { inner: FileDesc::new(fd) }
    }
}

impl IntoRawFd for TimerFd {
    fn into_raw_fd(self) -> RawFd {
        self.inner.into_raw_fd()
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
