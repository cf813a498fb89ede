//! A stream fed from arbitrary OS threads. Mirrors the promise `bridge`
//! mechanism: a background thread pushes onto a [`ConcurrentQueue`] and
//! wakes the loop, which drains it on its own thread and forwards items
//! into an ordinary [`PushStream`].

use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use concurrent_queue::ConcurrentQueue;

use super::push::PushStream;
use super::SourceRef;
use crate::error::{registration_failed, Result};
use crate::reactor::Loop;
use crate::sys;

/// The `Send`-safe half of a queue stream, held by producer threads.
pub struct QueueSender<T> {
    queue: Arc<ConcurrentQueue<T>>,
    waker: Arc<sys::Waker>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        QueueSender { queue: self.queue.clone(), waker: self.waker.clone() }
    }
}

impl<T: Send> QueueSender<T> {
    /// Enqueues `item` and wakes the owning loop. Silently dropped if the
    /// stream side has already closed.
    pub fn send(&self, item: T) {
        let _ = self.queue.push(item);
        let _ = self.waker.wake();
    }

    /// Closes the queue; the stream delivers its `close` event once the
    /// backlog already enqueued has drained.
    pub fn close(&self) {
        self.queue.close();
        let _ = self.waker.wake();
    }
}

/// Builder for the loop-owned half of a queue stream.
pub struct QueueStream;

impl QueueStream {
    /// Creates a queue stream registered on `event_loop`, returning the
    /// sender and the resulting source.
    pub fn new<T: Send + 'static>(event_loop: &Loop) -> Result<(QueueSender<T>, SourceRef<T>)> {
        let queue: Arc<ConcurrentQueue<T>> = Arc::new(ConcurrentQueue::unbounded());
        let waker =
            Arc::new(sys::Waker::new().map_err(|e| registration_failed("queue waker", e))?);
        let stream = PushStream::new();

        let queue_reader = queue.clone();
        let waker_reader = waker.clone();
        let sink = stream.clone();
        let handle = event_loop.on_readable(waker.as_raw_fd(), move |_eof| {
            let _ = waker_reader.drain();
            while let Ok(item) = queue_reader.pop() {
                sink.push(item);
            }
            if queue_reader.is_closed() {
                sink.close();
            }
        });
        handle.resume()?;

        Ok((QueueSender { queue, waker }, stream.source()))
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::stream::{Sink, StreamError, Upstream};

    struct CollectSink {
        items: Rc<RefCell<Vec<i32>>>,
    }

    impl Sink<i32> for CollectSink {
        fn connect(&self, upstream: Upstream) {
            upstream.request(u64::MAX);
        }
        fn next(&self, item: i32) {
            self.items.borrow_mut().push(item);
        }
        fn error(&self, _error: StreamError) {}
        fn close(&self) {}
    }

    #[test]
    fn delivers_items_sent_from_another_thread() {
        let event_loop = Loop::new("queue-test").unwrap();
        let (sender, source) = QueueStream::new::<i32>(&event_loop).unwrap();

        let items = Rc::new(RefCell::new(Vec::new()));
        source.subscribe(Rc::new(CollectSink { items: items.clone() }));

        let worker_sender = sender.clone();
        let worker = thread::spawn(move || {
            for i in 0..5 {
                worker_sender.send(i);
            }
            worker_sender.close();
        });

        let start = std::time::Instant::now();
        while items.borrow().len() < 5 && start.elapsed() < Duration::from_secs(2) {
            event_loop.run(Some(Duration::from_millis(50))).unwrap();
        }
        worker.join().unwrap();

        assert_eq!(*items.borrow(), vec![0, 1, 2, 3, 4]);
    }
}
