//! 1-to-1 synchronous transform. Demand passes straight through: one item
//! requested downstream is exactly one item requested upstream.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Sink, SinkRef, Source, SourceRef, StreamError, Upstream};
use crate::error::Error;

struct MapStage<In, Out> {
    upstream: SourceRef<In>,
    f: RefCell<Box<dyn FnMut(In) -> Result<Out, Error>>>,
    downstream: RefCell<Option<SinkRef<Out>>>,
}

impl<In: 'static, Out: 'static> Source<Out> for MapStage<In, Out> {
    fn subscribe(self: Rc<Self>, downstream: SinkRef<Out>) {
        *self.downstream.borrow_mut() = Some(downstream);
        self.upstream.clone().subscribe(self.clone());
    }
}

impl<In: 'static, Out: 'static> Sink<In> for MapStage<In, Out> {
    fn connect(&self, upstream: Upstream) {
        if let Some(d) = self.downstream.borrow().as_ref() {
            d.connect(upstream);
        }
    }

    fn next(&self, item: In) {
        let result = (self.f.borrow_mut())(item);
        if let Some(d) = self.downstream.borrow().as_ref() {
            match result {
                Ok(out) => d.next(out),
                Err(e) => d.error(Rc::new(e)),
            }
        }
    }

    fn error(&self, error: StreamError) {
        if let Some(d) = self.downstream.borrow().as_ref() {
            d.error(error);
        }
    }

    fn close(&self) {
        if let Some(d) = self.downstream.borrow().as_ref() {
            d.close();
        }
    }
}

/// Transforms every item with `f`; an `Err` from `f` closes the stream
/// with that error instead of delivering an item.
pub fn map<In: 'static, Out: 'static>(
    upstream: SourceRef<In>,
    f: impl FnMut(In) -> Result<Out, Error> + 'static,
) -> SourceRef<Out> {
    Rc::new(MapStage { upstream, f: RefCell::new(Box::new(f)), downstream: RefCell::new(None) })
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
    fn doubles_every_item() {
        let source = PushStream::new();
        let mapped = map(source.source(), |x: i32| Ok(x * 2));
        let items = Rc::new(RefCell::new(Vec::new()));
        mapped.subscribe(Rc::new(CollectSink { items: items.clone() }));

        source.push(1);
        source.push(2);
        source.push(3);
        source.close();

        assert_eq!(*items.borrow(), vec![2, 4, 6]);
    }
}
