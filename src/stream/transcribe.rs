//! 1-to-many synchronous transform: each input item expands into zero or
//! more output items, which are queued and drained as demand allows.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use super::{Demand, Sink, SinkRef, Source, SourceRef, StreamError, Upstream};

struct TranscribeStage<In, Out> {
    upstream: SourceRef<In>,
    f: RefCell<Box<dyn FnMut(In) -> Vec<Out>>>,
    downstream: RefCell<Option<SinkRef<Out>>>,
    upstream_handle: RefCell<Option<Upstream>>,
    pending: RefCell<VecDeque<Out>>,
    demand: Cell<Demand>,
    closed: Cell<bool>,
    self_weak: RefCell<Weak<TranscribeStage<In, Out>>>,
}

impl<In: 'static, Out: 'static> TranscribeStage<In, Out> {
    fn update(&self) {
        loop {
            let mut demand = self.demand.get();
            if demand.is_zero() {
                return;
            }
            if let Some(out) = self.pending.borrow_mut().pop_front() {
                demand.take_one();
                self.demand.set(demand);
                if let Some(d) = self.downstream.borrow().as_ref() {
                    d.next(out);
                }
                continue;
            }
            if self.closed.get() {
                if let Some(d) = self.downstream.borrow().as_ref() {
                    d.close();
                }
            } else if let Some(up) = self.upstream_handle.borrow().as_ref() {
                up.request(1);
            }
            return;
        }
    }
}

impl<In: 'static, Out: 'static> Source<Out> for TranscribeStage<In, Out> {
    fn subscribe(self: Rc<Self>, downstream: SinkRef<Out>) {
        *self.downstream.borrow_mut() = Some(downstream);
        *self.self_weak.borrow_mut() = Rc::downgrade(&self);
        self.upstream.clone().subscribe(self.clone());
    }
}

impl<In: 'static, Out: 'static> Sink<In> for TranscribeStage<In, Out> {
    fn connect(&self, upstream: Upstream) {
        *self.upstream_handle.borrow_mut() = Some(upstream);
        let weak = self.self_weak.borrow().clone();
        let weak_cancel = weak.clone();
        let handle = Upstream::new(
            move |n| {
                if let Some(stage) = weak.upgrade() {
                    let mut demand = stage.demand.get();
                    demand.add(n);
                    stage.demand.set(demand);
                    stage.update();
                }
            },
            move || {
                if let Some(stage) = weak_cancel.upgrade() {
                    if let Some(up) = stage.upstream_handle.borrow().as_ref() {
                        up.cancel();
                    }
                }
            },
        );
        if let Some(d) = self.downstream.borrow().as_ref() {
            d.connect(handle);
        }
    }

    fn next(&self, item: In) {
        let outs = (self.f.borrow_mut())(item);
        self.pending.borrow_mut().extend(outs);
        self.update();
    }

    fn error(&self, error: StreamError) {
        if let Some(d) = self.downstream.borrow().as_ref() {
            d.error(error);
        }
    }

    fn close(&self) {
        self.closed.set(true);
        self.update();
    }
}

pub fn transcribe<In: 'static, Out: 'static>(
    upstream: SourceRef<In>,
    f: impl FnMut(In) -> Vec<Out> + 'static,
) -> SourceRef<Out> {
    Rc::new(TranscribeStage {
        upstream,
        f: RefCell::new(Box::new(f)),
        downstream: RefCell::new(None),
        upstream_handle: RefCell::new(None),
        pending: RefCell::new(VecDeque::new()),
        demand: Cell::new(Demand::zero()),
        closed: Cell::new(false),
        self_weak: RefCell::new(Weak::new()),
    })
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::stream::push::PushStream;

    struct CollectSink<T> {
        items: Rc<RefCell<Vec<T>>>,
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
    fn expands_each_item_into_two() {
        let source = PushStream::new();
        let out = transcribe(source.source(), |x: i32| vec![x, x]);
        let items = Rc::new(RefCell::new(Vec::new()));
        out.subscribe(Rc::new(CollectSink { items: items.clone() }));

        source.push(1);
        source.push(2);
        source.close();

        assert_eq!(*items.borrow(), vec![1, 1, 2, 2]);
    }
}
