//! Terminal sink: requests unbounded demand and hands every item to a
//! callback, useful for tests and fire-and-forget consumption.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Sink, SourceRef, StreamError, Upstream};

struct DrainSink<T> {
    on_item: RefCell<Box<dyn FnMut(T)>>,
    on_error: RefCell<Option<Box<dyn FnOnce(StreamError)>>>,
    on_close: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl<T: 'static> Sink<T> for DrainSink<T> {
    fn connect(&self, upstream: Upstream) {
        upstream.request(u64::MAX);
    }

    fn next(&self, item: T) {
        (self.on_item.borrow_mut())(item);
    }

    fn error(&self, error: StreamError) {
        if let Some(cb) = self.on_error.borrow_mut().take() {
            cb(error);
        }
    }

    fn close(&self) {
        if let Some(cb) = self.on_close.borrow_mut().take() {
            cb();
        }
    }
}

/// Subscribes to `source` with unbounded demand, invoking `on_item` for
/// every delivered item.
pub fn drain<T: 'static>(source: SourceRef<T>, on_item: impl FnMut(T) + 'static) {
    drain_with(source, on_item, |_| {}, || {});
}

/// As [`drain`], but also observes the terminal error/close events.
pub fn drain_with<T: 'static>(
    source: SourceRef<T>,
    on_item: impl FnMut(T) + 'static,
    on_error: impl FnOnce(StreamError) + 'static,
    on_close: impl FnOnce() + 'static,
) {
    let sink = Rc::new(DrainSink {
        on_item: RefCell::new(Box::new(on_item)),
        on_error: RefCell::new(Some(Box::new(on_error))),
        on_close: RefCell::new(Some(Box::new(on_close))),
    });
    source.subscribe(sink);
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::stream::push::PushStream;

    #[test]
    fn collects_every_item_and_observes_close() {
        let source = PushStream::new();
        let items = Rc::new(RefCell::new(Vec::new()));
        let closed = Rc::new(RefCell::new(false));

        let items2 = items.clone();
        let closed2 = closed.clone();
        drain_with(source.source(), move |x: i32| items2.borrow_mut().push(x), |_| {}, move || {
            *closed2.borrow_mut() = true;
        });

        source.push(1);
        source.push(2);
        source.close();

        assert_eq!(*items.borrow(), vec![1, 2]);
        assert!(*closed.borrow());
    }
}
