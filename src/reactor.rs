//! Event Source and Event Loop: one registration against a readiness
//! notifier, and the single-threaded executor that owns a set of them.
//!
//! The two are defined in one module because they are mutually recursive:
//! a `Loop` owns the arena a `SourceHandle` indexes into, and a
//! `SourceHandle`'s resume/suspend/cancel directly drive the `Loop`'s
//! notifier. Splitting them across files would only separate the state
//! machine from the arena that stores it.

use std::cell::RefCell;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use slab::Slab;

use crate::error::{registration_failed, Error, Result};
use crate::sys::{self, Interest, Readiness};

/// `callback(is_eof)`. `is_eof` signals terminal hangup (read/write sources)
/// or one-shot exhaustion (timer/next-tick sources).
pub type Callback = Box<dyn FnMut(bool)>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Suspended,
    Resumed,
    Cancelled,
}

#[cfg(target_os = "linux")]
type TimerBacking = crate::sys::timerfd::TimerFd;
#[cfg(not(target_os = "linux"))]
type TimerBacking = usize;

enum Backing {
    Read(RawFd),
    Write(RawFd),
    /// Fires once after a duration.
    Timer { backing: TimerBacking, duration: Duration },
    /// Fires once on the next poll cycle.
    NextTick { backing: TimerBacking },
}

struct Slot {
    backing: Backing,
    state: State,
    callback: Option<Callback>,
}

struct Inner {
    label: String,
    notifier: sys::Notifier,
    events: sys::Events,
    sources: Slab<Slot>,
    run_depth: usize,
    reentered: bool,
    pending_removal: Vec<usize>,
}

/// Default bound on events returned per poll cycle (§6 Environment).
pub const DEFAULT_MAX_EVENTS: usize = 4096;

/// A single-threaded, cooperative executor: one notifier, one source
/// arena, one reusable event buffer.
#[derive(Clone)]
pub struct Loop(Rc<RefCell<Inner>>);

impl Loop {
    pub fn new(label: impl Into<String>) -> Result<Loop> {
        Loop::with_max_events(label, DEFAULT_MAX_EVENTS)
    }

    pub fn with_max_events(label: impl Into<String>, max_events: usize) -> Result<Loop> {
        let notifier = sys::Notifier::new().map_err(Error::LoopInit)?;
        Ok(Loop(Rc::new(RefCell::new(Inner {
            label: label.into(),
            notifier,
            events: sys::Events::with_capacity(max_events),
            sources: Slab::new(),
            run_depth: 0,
            reentered: false,
            pending_removal: Vec::new(),
        }))))
    }

    pub fn label(&self) -> String {
        self.0.borrow().label.clone()
    }

    pub fn on_readable(&self, fd: RawFd, callback: impl FnMut(bool) + 'static) -> SourceHandle {
        self.insert(Backing::Read(fd), callback)
    }

    pub fn on_writable(&self, fd: RawFd, callback: impl FnMut(bool) + 'static) -> SourceHandle {
        self.insert(Backing::Write(fd), callback)
    }

    pub fn on_timeout(&self, duration: Duration, callback: impl FnMut(bool) + 'static) -> Result<SourceHandle> {
        let backing = new_timer_backing()?;
        Ok(self.insert(Backing::Timer { backing, duration }, callback))
    }

    pub fn on_next_tick(&self, callback: impl FnMut(bool) + 'static) -> Result<SourceHandle> {
        let backing = new_timer_backing()?;
        Ok(self.insert(Backing::NextTick { backing }, callback))
    }

    fn insert(&self, backing: Backing, callback: impl FnMut(bool) + 'static) -> SourceHandle {
        let key = self.0.borrow_mut().sources.insert(Slot {
            backing,
            state: State::Suspended,
            callback: Some(Box::new(callback)),
        });
        SourceHandle { inner: self.0.clone(), key }
    }

    /// Runs at most one poll cycle: waits for readiness (or `timeout`),
    /// then dispatches every event observed in that wait.
    pub fn run(&self, timeout: Option<Duration>) -> Result<()> {
        self.drain_pending_removal();

        let was_nested = self.0.borrow().run_depth > 0;
        {
            let mut inner = self.0.borrow_mut();
            inner.run_depth += 1;
            if was_nested {
                inner.reentered = true;
            }
        }

        let batch = self.poll_once(timeout)?;

        for (key, readiness) in batch {
            if self.0.borrow().reentered {
                break;
            }
            self.dispatch_one(key, readiness);
        }

        let mut inner = self.0.borrow_mut();
        inner.run_depth -= 1;
        if inner.run_depth == 0 {
            inner.reentered = false;
        }
        Ok(())
    }

    /// Runs forever, resetting the recursion guard at the start of each
    /// cycle.
    pub fn run_loop(&self, timeout: Option<Duration>) -> Result<()> {
        loop {
            self.0.borrow_mut().run_depth = 0;
            self.run(timeout)?;
        }
    }

    fn poll_once(&self, timeout: Option<Duration>) -> Result<Vec<(usize, Readiness)>> {
        loop {
            let mut inner = self.0.borrow_mut();
            let Inner { notifier, events, .. } = &mut *inner;
            match notifier.wait(events, timeout) {
                Ok(()) => return Ok(events.iter().map(|e| (e.key as usize, e.readiness)).collect()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("{}: poll failed: {}", inner.label, e);
                    return Err(Error::Io(e));
                }
            }
        }
    }

    fn dispatch_one(&self, key: usize, readiness: Readiness) {
        let (callback, is_eof, auto_cancel) = {
            let mut inner = self.0.borrow_mut();
            match inner.sources.get_mut(key) {
                None => return,
                Some(slot) => {
                    if slot.state != State::Resumed {
                        return;
                    }
                    let is_eof = match slot.backing {
                        Backing::Timer { .. } | Backing::NextTick { .. } => true,
                        Backing::Read(_) | Backing::Write(_) => readiness.error || readiness.hup,
                    };
                    let auto_cancel = matches!(slot.backing, Backing::Timer { .. } | Backing::NextTick { .. })
                        || readiness.error;
                    (slot.callback.take(), is_eof, auto_cancel)
                }
            }
        };

        if auto_cancel {
            self.cancel_key(key);
        }

        if let Some(mut cb) = callback {
            cb(is_eof);
            if !auto_cancel {
                let mut inner = self.0.borrow_mut();
                if let Some(slot) = inner.sources.get_mut(key) {
                    if slot.state == State::Resumed {
                        slot.callback = Some(cb);
                    }
                }
            }
        }
    }

    fn cancel_key(&self, key: usize) {
        let mut inner = self.0.borrow_mut();
        let Inner { sources, notifier, pending_removal, .. } = &mut *inner;
        if let Some(slot) = sources.get_mut(key) {
            if slot.state == State::Cancelled {
                return;
            }
            deregister(notifier, &slot.backing);
            slot.state = State::Cancelled;
            slot.callback = None;
            pending_removal.push(key);
        }
    }

    /// Actually frees cancelled slots, deferred to the start of the next
    /// cycle so a stale kernel event from earlier in this batch can never
    /// be misrouted to a fresh registration reusing the same arena index.
    fn drain_pending_removal(&self) {
        let mut inner = self.0.borrow_mut();
        let pending = std::mem::take(&mut inner.pending_removal);
        for key in pending {
            inner.sources.try_remove(key);
        }
    }
}

fn new_timer_backing() -> Result<TimerBacking> {
    #[cfg(target_os = "linux")]
    {
        crate::sys::timerfd::TimerFd::new().map_err(Error::LoopInit)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(crate::sys::kqueue::next_ident())
    }
}

fn deregister(notifier: &sys::Notifier, backing: &Backing) {
    let result = match backing {
        Backing::Read(fd) | Backing::Write(fd) => notifier.delete(*fd),
        #[cfg(target_os = "linux")]
        Backing::Timer { backing, .. } => notifier.delete(backing.as_raw_fd()),
        #[cfg(not(target_os = "linux"))]
        Backing::Timer { backing, .. } => notifier.delete_timer(*backing),
        #[cfg(target_os = "linux")]
        Backing::NextTick { backing } => notifier.delete(backing.as_raw_fd()),
        #[cfg(not(target_os = "linux"))]
        Backing::NextTick { backing } => notifier.delete_next_tick(*backing),
    };
    if let Err(e) = result {
        log::warn!("deregistration failed: {}", e);
    }
}

/// A handle to one registration. Resume/suspend/cancel mirror kernel
/// registration state: add/enable on resume, disable (delete) on suspend,
/// delete permanently on cancel.
#[derive(Clone)]
pub struct SourceHandle {
    inner: Rc<RefCell<Inner>>,
    key: usize,
}

impl SourceHandle {
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let label = inner.label.clone();
        let Inner { sources, notifier, .. } = &mut *inner;
        let Some(slot) = sources.get_mut(self.key) else { return Ok(()) };
        if slot.state == State::Resumed || slot.state == State::Cancelled {
            return Ok(());
        }

        let key = self.key as u64;
        let result = match &mut slot.backing {
            Backing::Read(fd) => notifier.add(*fd, key, Interest::Read, false),
            Backing::Write(fd) => notifier.add(*fd, key, Interest::Write, false),
            #[cfg(target_os = "linux")]
            Backing::Timer { backing, duration } => backing
                .arm(*duration)
                .and_then(|()| notifier.add(backing.as_raw_fd(), key, Interest::Timer, true)),
            #[cfg(not(target_os = "linux"))]
            Backing::Timer { backing, duration } => notifier.add_timer(*backing, key, *duration),
            #[cfg(target_os = "linux")]
            Backing::NextTick { backing } => backing
                .arm(Duration::from_millis(0))
                .and_then(|()| notifier.add(backing.as_raw_fd(), key, Interest::Timer, true)),
            #[cfg(not(target_os = "linux"))]
            Backing::NextTick { backing } => notifier.add_next_tick(*backing, key),
        };

        match result {
            Ok(()) => {
                slot.state = State::Resumed;
                Ok(())
            }
            Err(e) => Err(registration_failed(&label, e)),
        }
    }

    pub fn suspend(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let Inner { sources, notifier, .. } = &mut *inner;
        let Some(slot) = sources.get_mut(self.key) else { return Ok(()) };
        if slot.state != State::Resumed {
            return Ok(());
        }
        deregister(notifier, &slot.backing);
        slot.state = State::Suspended;
        Ok(())
    }

    pub fn cancel(&self) {
        let mut inner = self.inner.borrow_mut();
        let Inner { sources, notifier, pending_removal, .. } = &mut *inner;
        if let Some(slot) = sources.get_mut(self.key) {
            if slot.state == State::Cancelled {
                return;
            }
            deregister(notifier, &slot.backing);
            slot.state = State::Cancelled;
            slot.callback = None;
            pending_removal.push(self.key);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self.inner.borrow().sources.get(self.key) {
            Some(slot) => slot.state == State::Cancelled,
            None => true,
        }
    }
}
