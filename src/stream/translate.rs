//! The translating stream: an operator whose input/output cardinality is
//! not 1:1. A pending input is held in `current_input` and re-offered to
//! the translation function until it is fully consumed.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::{Demand, Sink, SinkRef, Source, SourceRef, StreamError, Upstream};

/// Result of asking the translation function to make progress on the
/// currently held input.
pub enum Translation<In, Out> {
    /// Not enough input to produce an output; discard the slot and pull
    /// more from upstream.
    Insufficient,
    /// Produced exactly one output and fully consumed the input.
    Sufficient(Out),
    /// Produced one output but `remainder` still has more to give;
    /// `translate` is invoked again on `remainder` before requesting more
    /// from upstream.
    Excess(Out, In),
}

struct TranslateStage<In, Out> {
    upstream: SourceRef<In>,
    f: RefCell<Box<dyn FnMut(In) -> Translation<In, Out>>>,
    /// Called once the stream closes with input exhausted, to give an
    /// operator with its own internal accumulator (chunking, splitting) a
    /// chance to emit a final short item before `close` reaches downstream.
    flush: RefCell<Box<dyn FnMut() -> Option<Out>>>,
    downstream: RefCell<Option<SinkRef<Out>>>,
    upstream_handle: RefCell<Option<Upstream>>,
    current_input: RefCell<Option<In>>,
    demand: Cell<Demand>,
    closed: Cell<bool>,
    self_weak: RefCell<Weak<TranslateStage<In, Out>>>,
}

impl<In: 'static, Out: 'static> TranslateStage<In, Out> {
    fn update(&self) {
        loop {
            let mut demand = self.demand.get();
            if demand.is_zero() {
                return;
            }
            let input = match self.current_input.borrow_mut().take() {
                Some(input) => input,
                None => {
                    if self.closed.get() {
                        if let Some(out) = (self.flush.borrow_mut())() {
                            demand.take_one();
                            self.demand.set(demand);
                            if let Some(d) = self.downstream.borrow().as_ref() {
                                d.next(out);
                            }
                            continue;
                        }
                        if let Some(d) = self.downstream.borrow().as_ref() {
                            d.close();
                        }
                    } else if let Some(up) = self.upstream_handle.borrow().as_ref() {
                        up.request(1);
                    }
                    return;
                }
            };

            match (self.f.borrow_mut())(input) {
                Translation::Insufficient => continue,
                Translation::Sufficient(out) => {
                    demand.take_one();
                    self.demand.set(demand);
                    if let Some(d) = self.downstream.borrow().as_ref() {
                        d.next(out);
                    }
                }
                Translation::Excess(out, remainder) => {
                    *self.current_input.borrow_mut() = Some(remainder);
                    demand.take_one();
                    self.demand.set(demand);
                    if let Some(d) = self.downstream.borrow().as_ref() {
                        d.next(out);
                    }
                }
            }
        }
    }
}

impl<In: 'static, Out: 'static> Source<Out> for TranslateStage<In, Out> {
    fn subscribe(self: Rc<Self>, downstream: SinkRef<Out>) {
        *self.downstream.borrow_mut() = Some(downstream);
        *self.self_weak.borrow_mut() = Rc::downgrade(&self);
        self.upstream.clone().subscribe(self.clone());
    }
}

impl<In: 'static, Out: 'static> Sink<In> for TranslateStage<In, Out> {
    fn connect(&self, upstream: Upstream) {
        *self.upstream_handle.borrow_mut() = Some(upstream);
        let weak = self.self_weak.borrow().clone();
        let weak_cancel = weak.clone();
        let downstream_upstream = Upstream::new(
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
            d.connect(downstream_upstream);
        }
    }

    fn next(&self, item: In) {
        *self.current_input.borrow_mut() = Some(item);
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

pub fn translate<In: 'static, Out: 'static>(
    upstream: SourceRef<In>,
    f: impl FnMut(In) -> Translation<In, Out> + 'static,
) -> SourceRef<Out> {
    translate_with_flush(upstream, f, || None)
}

/// Like `translate`, but `flush` is called once input is exhausted and the
/// stream has closed, giving an operator with its own accumulator outside
/// `current_input` (chunking, splitting) a chance to emit a final item
/// before `close` reaches downstream. `flush` is called repeatedly until it
/// returns `None`.
pub fn translate_with_flush<In: 'static, Out: 'static>(
    upstream: SourceRef<In>,
    f: impl FnMut(In) -> Translation<In, Out> + 'static,
    flush: impl FnMut() -> Option<Out> + 'static,
) -> SourceRef<Out> {
    Rc::new(TranslateStage {
        upstream,
        f: RefCell::new(Box::new(f)),
        flush: RefCell::new(Box::new(flush)),
        downstream: RefCell::new(None),
        upstream_handle: RefCell::new(None),
        current_input: RefCell::new(None),
        demand: Cell::new(Demand::zero()),
        closed: Cell::new(false),
        self_weak: RefCell::new(Weak::new()),
    })
}

#[cfg(test)]
mod test {
    use super::super::Demand;

    #[test]
    fn demand_tracks_saturating() {
        let mut d = Demand::zero();
        d.add(u64::MAX);
        d.add(5);
        assert_eq!(d.get(), u64::MAX);
        assert!(d.take_one());
        assert_eq!(d.get(), u64::MAX - 1);
    }
}
