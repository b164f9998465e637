//! Closure bridge accounting — reference counts and fire-modes.
//!
//! A `ClosureRecord` wraps a guest function-table entry plus two opaque
//! environment words as a host-callable value. The record carries an
//! explicit fire-mode discriminant chosen at creation:
//!
//! - `FireMode::Once`: the single invocation takes the environment
//!   (`env_a` is zeroed), so a later drop-driven decrement reaches zero
//!   without a second release.
//! - `FireMode::Many`: each invocation increments the count before the
//!   call and decrements after it, so an external drop racing an in-flight
//!   call defers the release to whichever decrement reaches zero.
//!
//! `env_a == 0` is the released sentinel; a trampoline is never invoked
//! once the environment is gone. All count mutation happens on the single
//! thread driving the session — there is no atomicity here, and none is
//! needed.

use crate::error::HostError;
use std::cell::RefCell;
use std::rc::Rc;

pub type ClosureRef = Rc<RefCell<ClosureRecord>>;

/// Whether the environment is consumed on first invocation or retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireMode {
    Once,
    Many,
}

impl FireMode {
    /// Decode the discriminant passed by the guest to `closure_new`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Once),
            1 => Some(Self::Many),
            _ => None,
        }
    }
}

/// What the caller must do after a count transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    /// Nothing to release (count still positive, or already released).
    None,
    /// Call the guest destructor entry with the captured environment.
    /// Produced by the final in-flight decrement of a FireMany closure.
    CallDtor { dtor_idx: u32, env_a: i32, env_b: i32 },
    /// The guest frees its environment itself; the drop entry point
    /// reports this by returning 1.
    GuestFrees,
}

/// Everything the host needs to call a trampoline.
#[derive(Debug, Clone, Copy)]
pub struct InvokePlan {
    pub fn_idx: u32,
    pub env_a: i32,
    pub env_b: i32,
}

/// A guest closure wrapped as a host-callable value.
#[derive(Debug)]
pub struct ClosureRecord {
    fn_idx: u32,
    dtor_idx: u32,
    env_a: i32,
    env_b: i32,
    count: u32,
    mode: FireMode,
}

impl ClosureRecord {
    /// Wrap a trampoline. The record starts with a count of 1, owned by
    /// the handle returned to the guest.
    pub fn new(fn_idx: u32, dtor_idx: u32, env_a: i32, env_b: i32, mode: FireMode) -> Self {
        Self {
            fn_idx,
            dtor_idx,
            env_a,
            env_b,
            count: 1,
            mode,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn fn_idx(&self) -> u32 {
        self.fn_idx
    }

    pub fn mode(&self) -> FireMode {
        self.mode
    }

    /// True once the environment has been taken or released.
    pub fn is_released(&self) -> bool {
        self.env_a == 0
    }

    /// Start an invocation.
    ///
    /// FireOnce takes the environment here; FireMany pins it with an extra
    /// count so a drop during the call cannot release it out from under us.
    pub fn begin_invoke(&mut self) -> Result<InvokePlan, HostError> {
        if self.env_a == 0 {
            return Err(HostError::ClosureReleased);
        }
        let plan = InvokePlan {
            fn_idx: self.fn_idx,
            env_a: self.env_a,
            env_b: self.env_b,
        };
        match self.mode {
            FireMode::Once => self.env_a = 0,
            FireMode::Many => self.count += 1,
        }
        Ok(plan)
    }

    /// Finish an invocation started with [`begin_invoke`](Self::begin_invoke).
    pub fn finish_invoke(&mut self) -> ReleaseAction {
        match self.mode {
            FireMode::Once => ReleaseAction::None,
            FireMode::Many => {
                self.count -= 1;
                if self.count == 0 && self.env_a != 0 {
                    let action = ReleaseAction::CallDtor {
                        dtor_idx: self.dtor_idx,
                        env_a: self.env_a,
                        env_b: self.env_b,
                    };
                    self.env_a = 0;
                    action
                } else {
                    ReleaseAction::None
                }
            }
        }
    }

    /// Handle a drop request from the guest.
    ///
    /// Reaching zero with a live environment means no call is in flight:
    /// the guest frees the environment now. With calls still in flight the
    /// release is deferred to the final [`finish_invoke`](Self::finish_invoke).
    pub fn drop_ref(&mut self) -> ReleaseAction {
        debug_assert!(self.count > 0, "closure dropped more times than retained");
        self.count = self.count.saturating_sub(1);
        if self.count == 0 && self.env_a != 0 {
            self.env_a = 0;
            ReleaseAction::GuestFrees
        } else {
            ReleaseAction::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn many() -> ClosureRecord {
        ClosureRecord::new(7, 8, 100, 200, FireMode::Many)
    }

    #[test]
    fn test_fire_many_count_returns_to_one() {
        let mut rec = many();
        for _ in 0..5 {
            let plan = rec.begin_invoke().unwrap();
            assert_eq!(plan.env_a, 100);
            assert_eq!(rec.count(), 2);
            assert_eq!(rec.finish_invoke(), ReleaseAction::None);
            assert_eq!(rec.count(), 1);
        }
        assert!(!rec.is_released());
    }

    #[test]
    fn test_fire_many_drop_releases_once() {
        let mut rec = many();
        rec.begin_invoke().unwrap();
        rec.finish_invoke();
        assert_eq!(rec.drop_ref(), ReleaseAction::GuestFrees);
        assert!(rec.is_released());
        // Further invocation attempts see the released environment.
        assert!(matches!(
            rec.begin_invoke(),
            Err(HostError::ClosureReleased)
        ));
    }

    #[test]
    fn test_drop_during_in_flight_call_defers_release() {
        let mut rec = many();
        rec.begin_invoke().unwrap();
        // Guest drops its handle while the call is still running.
        assert_eq!(rec.drop_ref(), ReleaseAction::None);
        // The final in-flight decrement performs the release, via the dtor.
        assert_eq!(
            rec.finish_invoke(),
            ReleaseAction::CallDtor {
                dtor_idx: 8,
                env_a: 100,
                env_b: 200
            }
        );
        assert!(rec.is_released());
    }

    #[test]
    fn test_fire_once_takes_environment() {
        let mut rec = ClosureRecord::new(1, 2, 50, 0, FireMode::Once);
        let plan = rec.begin_invoke().unwrap();
        assert_eq!(plan.env_a, 50);
        assert!(rec.is_released());
        assert_eq!(rec.finish_invoke(), ReleaseAction::None);
        // Second fire is rejected instead of touching freed guest state.
        assert!(matches!(
            rec.begin_invoke(),
            Err(HostError::ClosureReleased)
        ));
        // The drop-driven decrement reaches zero without a second release.
        assert_eq!(rec.drop_ref(), ReleaseAction::None);
        assert_eq!(rec.count(), 0);
    }

    #[test]
    fn test_fire_once_dropped_without_firing() {
        let mut rec = ClosureRecord::new(1, 2, 50, 0, FireMode::Once);
        assert_eq!(rec.drop_ref(), ReleaseAction::GuestFrees);
    }
}
