//! Single-threaded cold observables
//!
//! Just enough stream runtime for request streams: a producer runs once per
//! `subscribe`, pushes notifications through a `Subscriber`, and returns a
//! `Teardown`. The subscriber enforces the contract the executors rely on:
//! nothing is delivered after the first terminal notification, and teardown
//! runs exactly once, either right after that terminal notification or when
//! the consumer unsubscribes, whichever comes first.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::AjaxError;

/// One stream notification
#[derive(Debug)]
pub enum Notification<T> {
    Next(T),
    Error(AjaxError),
    Completed,
}

impl<T> Notification<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }
}

/// Cleanup returned by a producer
pub struct Teardown(Option<Box<dyn FnOnce()>>);

impl Teardown {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn noop() -> Self {
        Self(None)
    }

    fn run(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Teardown").field(&self.0.is_some()).finish()
    }
}

type Sink<T> = Box<dyn FnMut(Notification<T>)>;

struct Shared<T> {
    sink: RefCell<Option<Sink<T>>>,
    closed: Cell<bool>,
    teardown: RefCell<Option<Teardown>>,
}

impl<T> Shared<T> {
    fn deliver(&self, notification: Notification<T>) {
        let sink = self.sink.borrow_mut().take();
        if let Some(mut sink) = sink {
            sink(notification);
            *self.sink.borrow_mut() = Some(sink);
        }
    }

    fn run_teardown(&self) {
        let teardown = self.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown.run();
        }
    }
}

trait Closable {
    fn close(&self);
    fn is_closed(&self) -> bool;
}

impl<T> Closable for Shared<T> {
    fn close(&self) {
        self.closed.set(true);
        self.run_teardown();
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// Producer-side handle for pushing notifications
pub struct Subscriber<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Subscriber<T> {
    pub fn next(&self, value: T) {
        if self.shared.closed.get() {
            return;
        }
        self.shared.deliver(Notification::Next(value));
    }

    pub fn error(&self, err: AjaxError) {
        if self.shared.closed.replace(true) {
            return;
        }
        self.shared.deliver(Notification::Error(err));
        self.shared.run_teardown();
    }

    pub fn complete(&self) {
        if self.shared.closed.replace(true) {
            return;
        }
        self.shared.deliver(Notification::Completed);
        self.shared.run_teardown();
    }

    /// Terminal delivered or consumer unsubscribed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.get()
    }
}

/// Consumer-side cancellation handle
pub struct Subscription {
    inner: Rc<dyn Closable>,
}

impl Subscription {
    /// Stop delivery and run teardown. Idempotent.
    pub fn unsubscribe(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cold stream of `T`
pub struct Observable<T> {
    producer: Rc<dyn Fn(Subscriber<T>) -> Teardown>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observable")
    }
}

impl<T: 'static> Observable<T> {
    pub fn new(producer: impl Fn(Subscriber<T>) -> Teardown + 'static) -> Self {
        Self {
            producer: Rc::new(producer),
        }
    }

    /// Stream that fails on every subscription
    pub fn throw(make_error: impl Fn() -> AjaxError + 'static) -> Self {
        Self::new(move |subscriber| {
            subscriber.error(make_error());
            Teardown::noop()
        })
    }

    /// Run the producer for a new consumer
    pub fn subscribe(&self, sink: impl FnMut(Notification<T>) + 'static) -> Subscription {
        let shared = Rc::new(Shared {
            sink: RefCell::new(Some(Box::new(sink) as Sink<T>)),
            closed: Cell::new(false),
            teardown: RefCell::new(None),
        });

        let teardown = (self.producer)(Subscriber {
            shared: shared.clone(),
        });

        // A producer may finish synchronously
        if shared.closed.get() {
            teardown.run();
        } else {
            *shared.teardown.borrow_mut() = Some(teardown);
        }

        Subscription { inner: shared }
    }

    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Observable<U> {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Map with a fallible function; a failure becomes the terminal error
    pub fn try_map<U: 'static>(&self, f: impl Fn(T) -> Result<U, AjaxError> + 'static) -> Observable<U> {
        let source = self.clone();
        let f = Rc::new(f);

        Observable::new(move |downstream: Subscriber<U>| {
            let f = f.clone();
            let sink = downstream.clone();
            let upstream = source.subscribe(move |notification| match notification {
                Notification::Next(value) => match f(value) {
                    Ok(mapped) => sink.next(mapped),
                    Err(err) => sink.error(err),
                },
                Notification::Error(err) => sink.error(err),
                Notification::Completed => sink.complete(),
            });
            Teardown::new(move || upstream.unsubscribe())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record<T: 'static>(source: &Observable<T>) -> (Subscription, Rc<RefCell<Vec<Notification<T>>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink_log = log.clone();
        let subscription = source.subscribe(move |n| sink_log.borrow_mut().push(n));
        (subscription, log)
    }

    #[test]
    fn test_cold_producer_runs_per_subscription() {
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let source = Observable::new(move |subscriber: Subscriber<u32>| {
            counter.set(counter.get() + 1);
            subscriber.next(7);
            subscriber.complete();
            Teardown::noop()
        });

        assert_eq!(runs.get(), 0);
        let (_a, log_a) = record(&source);
        let (_b, _log_b) = record(&source);
        assert_eq!(runs.get(), 2);
        assert!(matches!(log_a.borrow()[0], Notification::Next(7)));
        assert!(matches!(log_a.borrow()[1], Notification::Completed));
    }

    #[test]
    fn test_nothing_after_terminal() {
        let source = Observable::new(|subscriber: Subscriber<u32>| {
            subscriber.complete();
            subscriber.next(1);
            subscriber.error(AjaxError::CorsUnsupported);
            Teardown::noop()
        });
        let (subscription, log) = record(&source);

        assert_eq!(log.borrow().len(), 1);
        assert!(subscription.is_closed());
    }

    #[test]
    fn test_teardown_runs_once_after_sync_terminal() {
        let teardowns = Rc::new(Cell::new(0));
        let counter = teardowns.clone();
        let source = Observable::new(move |subscriber: Subscriber<u32>| {
            subscriber.complete();
            let counter = counter.clone();
            Teardown::new(move || counter.set(counter.get() + 1))
        });
        let (subscription, _log) = record(&source);
        subscription.unsubscribe();
        subscription.unsubscribe();

        assert_eq!(teardowns.get(), 1);
    }

    #[test]
    fn test_unsubscribe_runs_teardown_once() {
        let teardowns = Rc::new(Cell::new(0));
        let counter = teardowns.clone();
        let source = Observable::new(move |_subscriber: Subscriber<u32>| {
            let counter = counter.clone();
            Teardown::new(move || counter.set(counter.get() + 1))
        });
        let (subscription, log) = record(&source);

        assert_eq!(teardowns.get(), 0);
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(teardowns.get(), 1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_try_map_failure_is_terminal() {
        let source = Observable::new(|subscriber: Subscriber<&'static str>| {
            subscriber.next("{");
            subscriber.complete();
            Teardown::noop()
        });
        let parsed = source.try_map(|text| Ok(serde_json::from_str::<serde_json::Value>(text)?));
        let (_subscription, log) = record(&parsed);

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0], Notification::Error(AjaxError::PayloadParse(_))));
    }

    #[test]
    fn test_map_unsubscribe_reaches_source() {
        let torn_down = Rc::new(Cell::new(false));
        let flag = torn_down.clone();
        let source = Observable::new(move |_subscriber: Subscriber<u32>| {
            let flag = flag.clone();
            Teardown::new(move || flag.set(true))
        });
        let (subscription, _log) = record(&source.map(|n| n * 2));
        subscription.unsubscribe();

        assert!(torn_down.get());
    }
}
