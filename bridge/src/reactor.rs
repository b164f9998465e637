//! Reactor — the single-threaded task queue behind pending results.
//!
//! Host operations that cannot complete synchronously enqueue a task and
//! hand the guest a pending handle. `drain` runs tasks FIFO: backend calls
//! execute, pendings settle, and registered continuations fire in
//! registration order. Each fire invokes a guest trampoline through the
//! exported function table and settles the chained downstream pending with
//! whatever the trampoline returns.

use std::cell::RefCell;
use std::rc::Rc;

use wasmtime::{Func, Ref, Store, Table};

use weft_hostapi::{
    ClosureRef, HostError, HostValue, Outcome, PendingRef, ReleaseAction, RequestData,
    ResponseData, Subscriber,
};

use crate::error::BridgeError;
use crate::state::BridgeState;

/// One unit of deferred work.
pub enum Task {
    /// Execute a request against the backend, then settle.
    Http {
        request: Rc<RefCell<RequestData>>,
        pending: PendingRef,
    },
    /// Parse a response body as JSON, then settle.
    ParseJson {
        response: Rc<ResponseData>,
        pending: PendingRef,
    },
    /// Decode a response body as text, then settle.
    ReadText {
        response: Rc<ResponseData>,
        pending: PendingRef,
    },
    /// Settle a pending with a known outcome.
    Settle {
        pending: PendingRef,
        outcome: Outcome,
    },
    /// Fire one continuation with a settled outcome.
    Fire { sub: Subscriber, outcome: Outcome },
}

/// Drain the task queue until it is empty. Returns the number of tasks
/// processed. Fires can enqueue further tasks; those run in the same
/// drain.
pub(crate) fn drain(
    store: &mut Store<BridgeState>,
    table: &Table,
) -> Result<usize, BridgeError> {
    let mut processed = 0;
    while let Some(task) = store.data_mut().tasks.pop_front() {
        processed += 1;
        match task {
            Task::Http { request, pending } => {
                let snapshot = request.borrow().snapshot();
                let backend = store.data().backend.clone();
                let outcome = match backend.execute(snapshot) {
                    Ok(response) => Ok(HostValue::Response(Rc::new(response))),
                    Err(err) => Err(HostValue::exception(HostError::from(err).to_string())),
                };
                settle(store.data_mut(), &pending, outcome);
            }
            Task::ParseJson { response, pending } => {
                let outcome = match response.body_json() {
                    Ok(value) => Ok(HostValue::Json(value)),
                    Err(err) => Err(HostValue::exception(err.to_string())),
                };
                settle(store.data_mut(), &pending, outcome);
            }
            Task::ReadText { response, pending } => {
                let outcome = match response.body_text() {
                    Ok(text) => Ok(HostValue::string(text)),
                    Err(err) => Err(HostValue::exception(err.to_string())),
                };
                settle(store.data_mut(), &pending, outcome);
            }
            Task::Settle { pending, outcome } => {
                settle(store.data_mut(), &pending, outcome);
            }
            Task::Fire { sub, outcome } => fire(store, table, sub, outcome)?,
        }
    }
    Ok(processed)
}

/// Settle a pending, scheduling a fire for every subscriber in
/// registration order.
///
/// Settling with a pending value adopts it instead: the outer pending
/// subscribes to the inner one and settles later with its outcome.
pub(crate) fn settle(state: &mut BridgeState, pending: &PendingRef, outcome: Outcome) {
    if let Ok(HostValue::Pending(inner)) = &outcome {
        if !Rc::ptr_eq(inner, pending) {
            let inner = inner.clone();
            attach(
                state,
                &inner,
                Subscriber {
                    on_ok: None,
                    on_err: None,
                    downstream: pending.clone(),
                },
            );
            return;
        }
        // A pending settled with itself can never complete; reject it.
        let subs = pending
            .borrow_mut()
            .settle(Err(HostValue::exception("pending chained to itself")));
        for sub in subs {
            state.schedule(Task::Fire {
                sub,
                outcome: Err(HostValue::exception("pending chained to itself")),
            });
        }
        return;
    }
    let subs = pending.borrow_mut().settle(outcome.clone());
    for sub in subs {
        state.schedule(Task::Fire {
            sub,
            outcome: outcome.clone(),
        });
    }
}

/// Register a continuation against a pending, scheduling an immediate
/// fire when it is already settled.
pub(crate) fn attach(state: &mut BridgeState, upstream: &PendingRef, sub: Subscriber) {
    if let Some((outcome, sub)) = upstream.borrow_mut().subscribe(sub) {
        state.schedule(Task::Fire { sub, outcome });
    }
}

/// Fire one continuation and settle its downstream pending.
///
/// A missing matching callback propagates the outcome downstream
/// unchanged, so chains without an error arm pass rejections through.
fn fire(
    store: &mut Store<BridgeState>,
    table: &Table,
    sub: Subscriber,
    outcome: Outcome,
) -> Result<(), BridgeError> {
    let (callback, arg) = match &outcome {
        Ok(value) => (sub.on_ok.clone(), value.clone()),
        Err(value) => (sub.on_err.clone(), value.clone()),
    };
    match callback {
        None => settle(store.data_mut(), &sub.downstream, outcome),
        Some(cb) => {
            let result = invoke(store, table, &cb, arg)?;
            settle(store.data_mut(), &sub.downstream, result);
        }
    }
    Ok(())
}

/// Call a wrapped guest closure with one argument.
///
/// The outer `Result` is an embedding failure; the inner [`Outcome`] is
/// what the invocation produced — the trampoline's returned value, or an
/// exception when the closure was already released or the guest trapped.
pub(crate) fn invoke(
    store: &mut Store<BridgeState>,
    table: &Table,
    callback: &ClosureRef,
    arg: HostValue,
) -> Result<Outcome, BridgeError> {
    let plan = match callback.borrow_mut().begin_invoke() {
        Ok(plan) => plan,
        Err(err) => return Ok(Err(HostValue::exception(err.to_string()))),
    };

    let func = table_func(store, table, plan.fn_idx)?;
    let typed = func.typed::<(i32, i32, i32), i32>(&*store)?;
    let arg_handle = store.data_mut().arena.alloc(arg);
    let result = typed.call(&mut *store, (plan.env_a, plan.env_b, arg_handle as i32));

    // The count transition happens even when the call trapped; a deferred
    // FireMany release still runs its destructor.
    let release = callback.borrow_mut().finish_invoke();
    perform_release(store, table, release)?;

    match result {
        Ok(ret) => Ok(Ok(store.data_mut().arena.take(ret as u32))),
        Err(trap) => {
            let message = trap
                .chain()
                .find_map(|cause| match cause.downcast_ref::<BridgeError>() {
                    Some(BridgeError::GuestThrow(msg)) => Some(msg.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| trap.to_string());
            Ok(Err(HostValue::exception(message)))
        }
    }
}

fn perform_release(
    store: &mut Store<BridgeState>,
    table: &Table,
    action: ReleaseAction,
) -> Result<(), BridgeError> {
    if let ReleaseAction::CallDtor {
        dtor_idx,
        env_a,
        env_b,
    } = action
    {
        let func = table_func(store, table, dtor_idx)?;
        let typed = func.typed::<(i32, i32), ()>(&*store)?;
        typed.call(&mut *store, (env_a, env_b))?;
    }
    Ok(())
}

/// Resolve a guest function table entry.
fn table_func(
    store: &mut Store<BridgeState>,
    table: &Table,
    idx: u32,
) -> Result<Func, BridgeError> {
    match table.get(&mut *store, idx as u64) {
        Some(Ref::Func(Some(func))) => Ok(func),
        Some(Ref::Func(None)) => Err(BridgeError::Validation(format!(
            "function table entry {idx} is null"
        ))),
        Some(_) => Err(BridgeError::Validation(format!(
            "function table entry {idx} is not a function"
        ))),
        None => Err(BridgeError::Validation(format!(
            "function table index {idx} out of range"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use std::sync::Arc;
    use weft_hostapi::{ClosureRecord, FireMode, MockHttp, Pending};

    fn state() -> BridgeState {
        BridgeState::new(Arc::new(MockHttp::new()), BridgeConfig::default())
    }

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

    fn fire_fn_indices(state: &BridgeState) -> Vec<u32> {
        state
            .tasks
            .iter()
            .map(|task| match task {
                Task::Fire { sub, .. } => sub.on_ok.as_ref().unwrap().borrow().fn_idx(),
                _ => panic!("expected only fire tasks"),
            })
            .collect()
    }

    #[test]
    fn test_settle_schedules_fires_in_registration_order() {
        let mut state = state();
        let pending = Pending::new();
        for n in 0..3 {
            attach(&mut state, &pending, sub(n));
        }
        settle(&mut state, &pending, Ok(HostValue::string("done")));
        assert_eq!(fire_fn_indices(&state), vec![0, 1, 2]);
    }

    #[test]
    fn test_attach_after_settle_schedules_immediately() {
        let mut state = state();
        let pending = Pending::settled(Ok(HostValue::Bool(true)));
        attach(&mut state, &pending, sub(7));
        assert_eq!(fire_fn_indices(&state), vec![7]);
    }

    #[test]
    fn test_settling_with_pending_adopts_it() {
        let mut state = state();
        let outer = Pending::new();
        let inner = Pending::new();
        settle(&mut state, &outer, Ok(HostValue::Pending(inner.clone())));

        // Outer stays open until the inner pending settles.
        assert!(!outer.borrow().is_settled());
        assert!(state.tasks.is_empty());

        settle(&mut state, &inner, Ok(HostValue::string("late")));
        // The propagating subscriber fires with no callback and settles
        // the outer pending downstream.
        match state.tasks.pop_front() {
            Some(Task::Fire { sub, outcome }) => {
                assert!(sub.on_ok.is_none());
                assert!(Rc::ptr_eq(&sub.downstream, &outer));
                assert!(matches!(outcome, Ok(HostValue::String(_))));
            }
            _ => panic!("expected a propagating fire task"),
        }
    }

    #[test]
    fn test_settling_pending_with_itself_rejects() {
        let mut state = state();
        let pending = Pending::new();
        settle(
            &mut state,
            &pending,
            Ok(HostValue::Pending(pending.clone())),
        );
        assert!(matches!(
            pending.borrow().state(),
            weft_hostapi::PendingState::Settled(Err(_))
        ));
    }
}
