//! Pending results — deferred host values and their continuations.
//!
//! A `Pending` is the handle-visible face of an asynchronous host
//! operation: created `Waiting`, settled exactly once with either a value
//! or an exception value. Continuations subscribe in order; settling
//! drains them in that order so registered closures fire FIFO. The state
//! machine here is pure — scheduling and trampoline invocation live in the
//! bridge crate's reactor.

use std::cell::RefCell;
use std::rc::Rc;

use crate::closure::ClosureRef;
use crate::value::HostValue;

/// Settled result of a pending: a value or an exception value.
pub type Outcome = Result<HostValue, HostValue>;

pub type PendingRef = Rc<RefCell<Pending>>;

#[derive(Debug)]
pub enum PendingState {
    Waiting,
    Settled(Outcome),
}

/// A continuation registered against a pending result.
///
/// `downstream` is the chained pending returned to the guest by
/// `promise_then`/`promise_then2`; it settles with whatever the fired
/// callback returns, or with the propagated outcome when the matching
/// callback is absent.
pub struct Subscriber {
    pub on_ok: Option<ClosureRef>,
    pub on_err: Option<ClosureRef>,
    pub downstream: PendingRef,
}

/// A deferred host value.
pub struct Pending {
    state: PendingState,
    subscribers: Vec<Subscriber>,
}

impl Pending {
    /// Fresh waiting pending behind a shared reference.
    pub fn new() -> PendingRef {
        Rc::new(RefCell::new(Self {
            state: PendingState::Waiting,
            subscribers: Vec::new(),
        }))
    }

    /// Pending that is already settled (host of `promise_resolve`).
    pub fn settled(outcome: Outcome) -> PendingRef {
        Rc::new(RefCell::new(Self {
            state: PendingState::Settled(outcome),
            subscribers: Vec::new(),
        }))
    }

    pub fn state(&self) -> &PendingState {
        &self.state
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.state, PendingState::Settled(_))
    }

    /// Settle and drain the subscriber list, in registration order.
    ///
    /// A pending settles exactly once; a second settle is a reactor bug
    /// and is ignored outside debug builds.
    pub fn settle(&mut self, outcome: Outcome) -> Vec<Subscriber> {
        debug_assert!(
            !self.is_settled(),
            "pending settled a second time"
        );
        if self.is_settled() {
            return Vec::new();
        }
        self.state = PendingState::Settled(outcome);
        std::mem::take(&mut self.subscribers)
    }

    /// Register a continuation.
    ///
    /// On a waiting pending the subscriber is queued and `None` is
    /// returned. On a settled pending the subscriber is handed back with
    /// the outcome so the caller can schedule the fire immediately.
    pub fn subscribe(&mut self, sub: Subscriber) -> Option<(Outcome, Subscriber)> {
        match &self.state {
            PendingState::Waiting => {
                self.subscribers.push(sub);
                None
            }
            PendingState::Settled(outcome) => Some((outcome.clone(), sub)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::{ClosureRecord, FireMode};

    fn cb(n: u32) -> ClosureRef {
        Rc::new(RefCell::new(ClosureRecord::new(n, 0, 1, 0, FireMode::Many)))
    }

    fn sub(n: u32) -> Subscriber {
        Subscriber {
            on_ok: Some(cb(n)),
            on_err: None,
            downstream: Pending::new(),
        }
    }

    #[test]
    fn test_settle_drains_in_registration_order() {
        let pending = Pending::new();
        for n in 0..4 {
            assert!(pending.borrow_mut().subscribe(sub(n)).is_none());
        }
        let subs = pending
            .borrow_mut()
            .settle(Ok(HostValue::string("done")));
        let order: Vec<u32> = subs
            .iter()
            .map(|s| s.on_ok.as_ref().unwrap().borrow().fn_idx())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(pending.borrow().is_settled());
    }

    #[test]
    fn test_subscribe_after_settle_returns_outcome() {
        let pending = Pending::settled(Ok(HostValue::Bool(true)));
        let (outcome, _sub) = pending.borrow_mut().subscribe(sub(9)).unwrap();
        assert!(matches!(outcome, Ok(HostValue::Bool(true))));
    }

    #[test]
    fn test_settle_with_error_outcome() {
        let pending = Pending::new();
        pending
            .borrow_mut()
            .settle(Err(HostValue::exception("nope")));
        match pending.borrow().state() {
            PendingState::Settled(Err(v)) => {
                assert_eq!(v.debug_string(), "Error: nope");
            }
            _ => panic!("pending did not settle with an error"),
        };
    }
}
