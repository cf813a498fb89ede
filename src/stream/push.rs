//! A root source fed by direct `push`/`close` calls from the same thread,
//! the in-memory counterpart to a socket source. Buffers items that
//! arrive ahead of demand.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Demand, Sink, SinkRef, Source, SourceRef, StreamError, Upstream};

struct Inner<T> {
    downstream: RefCell<Option<SinkRef<T>>>,
    backlog: RefCell<VecDeque<T>>,
    demand: Cell<Demand>,
    closed: Cell<bool>,
    cancelled: Cell<bool>,
    /// Guards against re-entrant draining: a downstream that calls
    /// `request(1)` synchronously from inside `next` (the normal
    /// back-pressure pattern) re-enters `update` before the outer call's
    /// `d.next(item)` has even returned. Without this, the re-entrant call
    /// would double-drain the backlog on top of the outer loop's own next
    /// iteration.
    draining: Cell<bool>,
}

impl<T: 'static> Inner<T> {
    fn update(&self) {
        if self.draining.replace(true) {
            return;
        }
        self.drain();
        self.draining.set(false);
    }

    fn drain(&self) {
        loop {
            if self.cancelled.get() {
                return;
            }
            let mut demand = self.demand.get();
            if demand.is_zero() {
                return;
            }
            // Bind the popped item before calling `d.next`, the same way
            // `SocketSource::update` drops its borrow before delivering:
            // holding the `RefMut` across `next` would panic the moment a
            // re-entrant `push` tries to borrow the backlog again.
            let item = self.backlog.borrow_mut().pop_front();
            match item {
                Some(item) => {
                    demand.take_one();
                    self.demand.set(demand);
                    if let Some(d) = self.downstream.borrow().as_ref() {
                        d.next(item);
                    }
                }
                None => {
                    if self.closed.get() {
                        if let Some(d) = self.downstream.borrow().as_ref() {
                            d.close();
                        }
                    }
                    return;
                }
            }
        }
    }
}

impl<T: 'static> Source<T> for Inner<T> {
    fn subscribe(self: Rc<Self>, downstream: SinkRef<T>) {
        *self.downstream.borrow_mut() = Some(downstream.clone());
        let this = self.clone();
        let this_cancel = self.clone();
        downstream.connect(Upstream::new(
            move |n| {
                let mut demand = this.demand.get();
                demand.add(n);
                this.demand.set(demand);
                this.update();
            },
            move || {
                this_cancel.cancelled.set(true);
            },
        ));
    }
}

/// A handle used to feed items into a pipeline from ordinary code.
pub struct PushStream<T>(Rc<Inner<T>>);

impl<T> Clone for PushStream<T> {
    fn clone(&self) -> Self {
        PushStream(self.0.clone())
    }
}

impl<T: 'static> PushStream<T> {
    pub fn new() -> PushStream<T> {
        PushStream(Rc::new(Inner {
            downstream: RefCell::new(None),
            backlog: RefCell::new(VecDeque::new()),
            demand: Cell::new(Demand::zero()),
            closed: Cell::new(false),
            cancelled: Cell::new(false),
            draining: Cell::new(false),
        }))
    }

    /// Queues `item` for delivery, subject to outstanding demand.
    pub fn push(&self, item: T) {
        self.0.backlog.borrow_mut().push_back(item);
        self.0.update();
    }

    pub fn close(&self) {
        self.0.closed.set(true);
        self.0.update();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.get()
    }

    /// A type-erased view suitable for wiring into operators.
    pub fn source(&self) -> SourceRef<T> {
        self.0.clone()
    }
}

impl<T: 'static> Default for PushStream<T> {
    fn default() -> Self {
        PushStream::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::StreamError;
    use std::cell::RefCell as StdRefCell;

    struct CollectSink<T> {
        items: Rc<StdRefCell<Vec<T>>>,
    }

    impl<T: 'static> Sink<T> for CollectSink<T> {
        fn connect(&self, upstream: Upstream) {
            upstream.request(u64::MAX);
        }
        fn next(&self, item: T) {
            self.items.borrow_mut().push(item);
        }
        fn error(&self, _error: StreamError) {}
        fn close(&self) {}
    }

    #[test]
    fn buffers_ahead_of_demand_and_drains_on_subscribe() {
        let stream = PushStream::new();
        stream.push(1);
        stream.push(2);
        stream.close();

        let items = Rc::new(StdRefCell::new(Vec::new()));
        stream.source().subscribe(Rc::new(CollectSink { items: items.clone() }));

        assert_eq!(*items.borrow(), vec![1, 2]);
    }

    #[test]
    fn cancel_stops_further_delivery() {
        let stream = PushStream::new();
        let items = Rc::new(StdRefCell::new(Vec::new()));

        struct CancelAfterOne<T> {
            items: Rc<StdRefCell<Vec<T>>>,
        }
        impl<T: 'static> Sink<T> for CancelAfterOne<T> {
            fn connect(&self, upstream: Upstream) {
                upstream.request(1);
            }
            fn next(&self, item: T) {
                self.items.borrow_mut().push(item);
            }
            fn error(&self, _error: StreamError) {}
            fn close(&self) {}
        }

        stream.source().subscribe(Rc::new(CancelAfterOne { items: items.clone() }));
        stream.push(1);
        stream.push(2);

        assert_eq!(*items.borrow(), vec![1]);
    }

    /// A downstream that requests exactly one item per `next` call, from
    /// inside `next` itself, re-enters `update` synchronously before the
    /// outer delivery returns. This must neither panic (a held `RefMut`
    /// across `d.next` would trip a `BorrowMutError`) nor double-deliver.
    #[test]
    fn survives_reentrant_request_one_at_a_time() {
        struct OneAtATimeSink<T> {
            upstream: StdRefCell<Option<Upstream>>,
            items: Rc<StdRefCell<Vec<T>>>,
        }
        impl<T: 'static> Sink<T> for OneAtATimeSink<T> {
            fn connect(&self, upstream: Upstream) {
                upstream.request(1);
                *self.upstream.borrow_mut() = Some(upstream);
            }
            fn next(&self, item: T) {
                self.items.borrow_mut().push(item);
                self.upstream.borrow().as_ref().unwrap().request(1);
            }
            fn error(&self, _error: StreamError) {}
            fn close(&self) {}
        }

        let stream = PushStream::new();
        let items = Rc::new(StdRefCell::new(Vec::new()));
        stream.source().subscribe(Rc::new(OneAtATimeSink {
            upstream: StdRefCell::new(None),
            items: items.clone(),
        }));

        stream.push(1);
        stream.push(2);
        stream.push(3);
        stream.close();

        assert_eq!(*items.borrow(), vec![1, 2, 3]);
    }
}
