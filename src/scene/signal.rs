//! Minimal synchronous event channel.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Listener<E> = Rc<dyn Fn(&E)>;

/// A list of listeners invoked synchronously on [`emit`](Signal::emit).
pub struct Signal<E> {
    listeners: Rc<RefCell<Vec<(u64, Listener<E>)>>>,
    next_id: Cell<u64>,
}

impl<E> Default for Signal<E> {
    fn default() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(0),
        }
    }
}

impl<E: 'static> Signal<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` until the returned [`Subscription`] is dropped.
    pub fn subscribe(&self, listener: impl Fn(&E) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));

        let listeners = Rc::downgrade(&self.listeners);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(listeners) = listeners.upgrade() {
                    listeners.borrow_mut().retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Calls every listener registered at the time of the call, in registration order.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_the_subscription_unsubscribes() {
        let signal = Signal::<u32>::new();
        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        let subscription = signal.subscribe(move |v| sink.set(sink.get() + v));
        signal.emit(&2);
        drop(subscription);
        signal.emit(&5);
        assert_eq!(seen.get(), 2);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn subscriptions_outliving_the_signal_are_harmless() {
        let subscription = {
            let signal = Signal::<()>::new();
            signal.subscribe(|_| {})
        };
        drop(subscription);
    }
}
