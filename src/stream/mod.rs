//! Back-pressured stream protocol: four input events (connect/next/error/
//! close) flowing downstream, two connection events (request/cancel)
//! flowing upstream. Every stage is type-erased behind [`Source`]/[`Sink`]
//! trait objects so pipelines of arbitrary operator chains share one
//! concrete representation and compile quickly.

use std::rc::Rc;

use crate::error::Error;

/// Stream-layer errors are `Rc`, not `Arc`: a pipeline never leaves the
/// thread that built it.
pub type StreamError = Rc<Error>;

/// The downstream-facing half of a stage: receives the four input events.
pub trait Sink<T> {
    fn connect(&self, upstream: Upstream);
    fn next(&self, item: T);
    fn error(&self, error: StreamError);
    fn close(&self);
}

pub type SinkRef<T> = Rc<dyn Sink<T>>;

/// The upstream-facing half of a stage: accepts subscriptions and, once
/// subscribed, delivers input events to whatever sink it is given.
pub trait Source<T> {
    fn subscribe(self: Rc<Self>, downstream: SinkRef<T>);
}

pub type SourceRef<T> = Rc<dyn Source<T>>;

/// The connection-context handle a sink uses to pull from its upstream.
pub struct Upstream {
    request: Box<dyn Fn(u64)>,
    cancel: Box<dyn Fn()>,
}

impl Upstream {
    pub fn new(request: impl Fn(u64) + 'static, cancel: impl Fn() + 'static) -> Upstream {
        Upstream { request: Box::new(request), cancel: Box::new(cancel) }
    }

    pub fn request(&self, n: u64) {
        (self.request)(n)
    }

    pub fn cancel(&self) {
        (self.cancel)()
    }
}

/// Outstanding demand, saturating so `request(u64::MAX)` can never wrap on
/// a later `request`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Demand(u64);

impl Demand {
    pub const fn zero() -> Demand {
        Demand(0)
    }

    pub fn add(&mut self, n: u64) {
        self.0 = self.0.saturating_add(n);
    }

    /// Consumes one unit of demand if any is outstanding.
    pub fn take_one(&mut self) -> bool {
        if self.0 == 0 {
            false
        } else {
            self.0 -= 1;
            true
        }
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

pub mod chunk;
pub mod drain;
pub mod map;
pub mod push;
pub mod queue;
pub mod split;
pub mod transcribe;
pub mod translate;

pub use chunk::chunking_stream;
pub use drain::drain;
pub use map::map;
pub use push::PushStream;
pub use queue::QueueStream;
pub use split::split;
pub use transcribe::transcribe;
pub use translate::{translate, Translation};
