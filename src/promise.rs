//! Promise/Future: a write-once cell with multiple awaiters, plus the
//! bridge that lets a background thread deliver a value to awaiters that
//! live on a loop's thread.

use std::cell::{Cell, RefCell};
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use concurrent_queue::ConcurrentQueue;

use crate::error::Error;
use crate::reactor::Loop;
use crate::sys;

/// The result carried by a completed promise. `Arc<Error>` rather than
/// `Error` so it can be read from both the owning thread's awaiters and a
/// `blocking_await` caller without requiring `Error: Clone`.
pub type Outcome<T> = Result<T, Arc<Error>>;

struct Signal<T> {
    value: Mutex<Option<Outcome<T>>>,
    condvar: Condvar,
}

impl<T> Signal<T> {
    fn new() -> Signal<T> {
        Signal { value: Mutex::new(None), condvar: Condvar::new() }
    }
}

type Awaiter<T> = Box<dyn FnOnce(Outcome<T>)>;

struct Awaiters<T> {
    list: RefCell<Vec<Awaiter<T>>>,
}

/// The write side of a promise cell. Cloning shares the same cell.
pub struct Promise<T> {
    signal: Arc<Signal<T>>,
    local: Rc<Awaiters<T>>,
}

/// The read side. Cloning shares the same cell.
pub struct Future<T> {
    signal: Arc<Signal<T>>,
    local: Rc<Awaiters<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise { signal: self.signal.clone(), local: self.local.clone() }
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future { signal: self.signal.clone(), local: self.local.clone() }
    }
}

impl<T: 'static> Promise<T> {
    pub fn new() -> (Promise<T>, Future<T>) {
        let signal = Arc::new(Signal::new());
        let local = Rc::new(Awaiters { list: RefCell::new(Vec::new()) });
        (
            Promise { signal: signal.clone(), local: local.clone() },
            Future { signal, local },
        )
    }

    /// First completion wins; later calls are silently dropped.
    pub fn complete(&self, value: T)
    where
        T: Clone,
    {
        self.resolve(Ok(value));
    }

    pub fn fail(&self, error: Error)
    where
        T: Clone,
    {
        self.resolve(Err(Arc::new(error)));
    }

    fn resolve(&self, outcome: Outcome<T>)
    where
        T: Clone,
    {
        let installed = {
            let mut guard = self.signal.value.lock().unwrap();
            if guard.is_some() {
                return;
            }
            *guard = Some(outcome.clone());
            true
        };
        if installed {
            self.signal.condvar.notify_all();
            let awaiters = std::mem::take(&mut *self.local.list.borrow_mut());
            for awaiter in awaiters {
                awaiter(outcome.clone());
            }
        }
    }

    /// A `Send + Sync` handle that can complete this promise from another
    /// thread. It can only update the shared signal — `blocking_await`
    /// always observes the result, but `.r#do`/`.catch` awaiters registered
    /// on the owning thread are not driven by it (see [`bridge`]).
    pub fn completer(&self) -> Completer<T>
    where
        T: Send,
    {
        Completer { signal: self.signal.clone() }
    }
}

/// A `Send + Sync` write handle that updates only the shared signal.
pub struct Completer<T> {
    signal: Arc<Signal<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Completer { signal: self.signal.clone() }
    }
}

impl<T: Send> Completer<T> {
    pub fn complete(&self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(&self, error: Error) {
        self.resolve(Err(Arc::new(error)));
    }

    fn resolve(&self, outcome: Outcome<T>) {
        let mut guard = self.signal.value.lock().unwrap();
        if guard.is_some() {
            return;
        }
        *guard = Some(outcome);
        self.signal.condvar.notify_all();
    }
}

impl<T: Clone + 'static> Future<T> {
    pub fn r#do(self, cb: impl FnOnce(T) + 'static) -> Self {
        self.on_complete(move |outcome| {
            if let Ok(v) = outcome {
                cb(v);
            }
        });
        self
    }

    pub fn catch(self, cb: impl FnOnce(Arc<Error>) + 'static) -> Self {
        self.on_complete(move |outcome| {
            if let Err(e) = outcome {
                cb(e);
            }
        });
        self
    }

    pub fn always(self, cb: impl FnOnce() + 'static) -> Self {
        self.on_complete(move |_| cb());
        self
    }

    pub fn map<U: Clone + 'static>(self, f: impl FnOnce(T) -> U + 'static) -> Future<U> {
        let (promise, future) = Promise::new();
        self.on_complete(move |outcome| match outcome {
            Ok(v) => promise.complete(f(v)),
            Err(e) => promise.resolve_err(e),
        });
        future
    }

    pub fn flat_map<U: Clone + 'static>(self, f: impl FnOnce(T) -> Future<U> + 'static) -> Future<U> {
        let (promise, future) = Promise::new();
        self.on_complete(move |outcome| match outcome {
            Ok(v) => {
                let inner = f(v);
                let promise = promise.clone();
                inner.on_complete(move |inner_outcome| match inner_outcome {
                    Ok(v) => promise.complete(v),
                    Err(e) => promise.resolve_err(e),
                });
            }
            Err(e) => promise.resolve_err(e),
        });
        future
    }

    pub fn transform<U: Clone + 'static>(self, value: U) -> Future<U> {
        self.map(move |_| value)
    }

    /// Blocks the calling thread until completion or `timeout` elapses.
    /// Always correctly observes a [`Completer`] completion from another
    /// thread, since both read the same signal.
    pub fn blocking_await(&self, timeout: Option<Duration>) -> Outcome<T> {
        let guard = self.signal.value.lock().unwrap();
        let guard = match timeout {
            Some(d) => {
                let (guard, result) =
                    self.signal.condvar.wait_timeout_while(guard, d, |v| v.is_none()).unwrap();
                if result.timed_out() && guard.is_none() {
                    return Err(Arc::new(Error::Timeout));
                }
                guard
            }
            None => self.signal.condvar.wait_while(guard, |v| v.is_none()).unwrap(),
        };
        guard.clone().expect("condvar predicate guarantees Some")
    }

    /// Drives `event_loop` until this future completes. Same-thread only —
    /// intended for cooperative code running inside a worker loop.
    pub fn r#await(&self, event_loop: &Loop) -> Outcome<T> {
        loop {
            if let Some(outcome) = self.signal.value.lock().unwrap().clone() {
                return outcome;
            }
            event_loop.run(Some(Duration::from_millis(50))).ok();
        }
    }

    fn on_complete(&self, cb: impl FnOnce(Outcome<T>) + 'static) {
        let existing = self.signal.value.lock().unwrap().clone();
        match existing {
            Some(outcome) => cb(outcome),
            None => self.local.list.borrow_mut().push(Box::new(cb)),
        }
    }
}

impl<T: Clone + 'static> Promise<T> {
    fn resolve_err(&self, error: Arc<Error>) {
        let installed = {
            let mut guard = self.signal.value.lock().unwrap();
            if guard.is_some() {
                return;
            }
            *guard = Some(Err(error.clone()));
            true
        };
        if installed {
            self.signal.condvar.notify_all();
            let awaiters = std::mem::take(&mut *self.local.list.borrow_mut());
            for awaiter in awaiters {
                awaiter(Err(error.clone()));
            }
        }
    }
}

/// Resolves when every input future completes, preserving input order
/// regardless of completion order; the combined future fails on the first
/// error and discards later successes.
pub fn flatten<T: Clone + 'static>(futures: Vec<Future<T>>) -> Future<Vec<T>> {
    let (promise, future) = Promise::new();
    if futures.is_empty() {
        promise.complete(Vec::new());
        return future;
    }

    let remaining = Rc::new(Cell::new(futures.len()));
    let results: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; futures.len()]));
    let failed = Rc::new(Cell::new(false));

    for (index, f) in futures.into_iter().enumerate() {
        let remaining = remaining.clone();
        let results = results.clone();
        let failed = failed.clone();
        let promise = promise.clone();
        f.on_complete(move |outcome| {
            if failed.get() {
                return;
            }
            match outcome {
                Ok(v) => {
                    results.borrow_mut()[index] = Some(v);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let values = results.borrow_mut().drain(..).map(|v| v.unwrap()).collect();
                        promise.complete(values);
                    }
                }
                Err(e) => {
                    failed.set(true);
                    promise.resolve_err(e);
                }
            }
        });
    }

    future
}

/// Drives lazily-constructed futures one at a time, in order; the next is
/// not built until the prior completes.
pub fn sync_flatten<T: Clone + 'static>(
    mut lazy: Vec<Box<dyn FnOnce() -> Future<T>>>,
) -> Future<Vec<T>> {
    let (promise, future) = Promise::new();
    let results = Rc::new(RefCell::new(Vec::with_capacity(lazy.len())));
    lazy.reverse();
    drive_sync_flatten(lazy, results, promise);
    future
}

fn drive_sync_flatten<T: Clone + 'static>(
    mut remaining: Vec<Box<dyn FnOnce() -> Future<T>>>,
    results: Rc<RefCell<Vec<T>>>,
    promise: Promise<Vec<T>>,
) {
    match remaining.pop() {
        None => promise.complete(results.borrow().clone()),
        Some(next) => {
            let future = next();
            future.on_complete(move |outcome| match outcome {
                Ok(v) => {
                    results.borrow_mut().push(v);
                    drive_sync_flatten(remaining, results, promise);
                }
                Err(e) => promise.resolve_err(e),
            });
        }
    }
}

/// A `Send + Sync` handle a background thread uses to deliver a value to
/// awaiters living on `event_loop`'s thread.
pub struct Sender<T> {
    queue: Arc<ConcurrentQueue<Outcome<T>>>,
    waker: Arc<sys::Waker>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender { queue: self.queue.clone(), waker: self.waker.clone() }
    }
}

impl<T: Send> Sender<T> {
    pub fn send(&self, value: T) {
        let _ = self.queue.push(Ok(value));
        let _ = self.waker.wake();
    }

    pub fn send_error(&self, error: Error) {
        let _ = self.queue.push(Err(Arc::new(error)));
        let _ = self.waker.wake();
    }
}

/// Registers a wakeup source on `event_loop` and returns a future that
/// completes, on `event_loop`'s own thread, the next time the returned
/// [`Sender`] is used — from any thread. This is the sanctioned way for a
/// thread outside the loop to complete a promise whose awaiters live on it.
pub fn bridge<T: Clone + Send + 'static>(event_loop: &Loop) -> crate::error::Result<(Sender<T>, Future<T>)> {
    let (promise, future) = Promise::new();
    let queue = Arc::new(ConcurrentQueue::unbounded());
    let waker = Arc::new(sys::Waker::new()?);

    let recv_queue = queue.clone();
    let recv_waker = waker.clone();
    let source = event_loop.on_readable(recv_waker.as_raw_fd(), move |_is_eof| {
        let _ = recv_waker.drain();
        while let Ok(outcome) = recv_queue.pop() {
            match outcome {
                Ok(v) => promise.complete(v),
                Err(e) => promise.resolve_err(e),
            }
        }
    });
    source.resume()?;

    Ok((Sender { queue, waker }, future))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flatten_preserves_order_regardless_of_completion_order() {
        let (pa, fa) = Promise::<i32>::new();
        let (pb, fb) = Promise::<i32>::new();

        let combined = flatten(vec![fa, fb]);
        let observed = Rc::new(RefCell::new(None));
        let observed_cb = observed.clone();
        combined.r#do(move |values| *observed_cb.borrow_mut() = Some(values));

        pb.complete(2);
        pa.complete(1);

        assert_eq!(*observed.borrow(), Some(vec![1, 2]));
    }

    #[test]
    fn second_completion_is_ignored() {
        let (promise, future) = Promise::<i32>::new();
        promise.complete(1);
        promise.complete(2);
        assert_eq!(future.blocking_await(None).unwrap(), 1);
    }

    #[test]
    fn blocking_await_times_out_then_later_succeeds() {
        use std::thread;

        let (promise, future) = Promise::<i32>::new();
        let completer = promise.completer();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            completer.complete(42);
        });

        let early = future.blocking_await(Some(Duration::from_millis(20)));
        match early {
            Err(e) => assert!(matches!(*e, Error::Timeout)),
            Ok(_) => panic!("expected timeout"),
        }

        let later = future.blocking_await(Some(Duration::from_secs(2)));
        assert_eq!(later.unwrap(), 42);
    }
}
