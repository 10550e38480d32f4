//! Listener records attached to a pending deferred, and the propagation trampoline.

use crate::deferred::{Deferred, ErrorTest, Outcome, RegisteredErrorHandler};
use crate::error::{AsyncError, Failure};
use crate::utils::Slab;
use crate::zone::Zone;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A continuation waiting for a deferred to settle.
pub(crate) trait Reaction<T> {
    /// Zone captured when the continuation was registered.
    fn zone(&self) -> &Zone;

    fn fire(self: Box<Self>, result: Result<T, Failure>);

    /// Takes the listeners of a target deferred nothing else can reach, so the reaction
    /// can be dropped without dropping them recursively.
    fn release(&mut self) -> Option<Box<dyn Any>> {
        None
    }
}

struct ListenerNode<T> {
    reaction: Box<dyn Reaction<T>>,
    next: Option<usize>,
}

/// Singly linked FIFO of reactions, stored in an arena.
pub(crate) struct ListenerChain<T> {
    arena: Slab<ListenerNode<T>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<T> ListenerChain<T> {
    pub(crate) fn push(&mut self, reaction: Box<dyn Reaction<T>>) {
        let index = self.arena.insert(ListenerNode {
            reaction,
            next: None,
        });

        match self.tail.and_then(|tail| self.arena.get_mut(tail)) {
            Some(tail) => tail.next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Box<dyn Reaction<T>>> {
        let head = self.head?;
        let node = self.arena.remove(head)?;

        self.head = node.next;
        if self.head.is_none() {
            self.tail = None;
        }

        Some(node.reaction)
    }

    /// Moves every reaction of `other` behind the reactions already queued here.
    pub(crate) fn append(&mut self, mut other: ListenerChain<T>) {
        while let Some(reaction) = other.pop_front() {
            self.push(reaction);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }
}

thread_local! {
    static ORPHANS: RefCell<Vec<Box<dyn Any>>> = const { RefCell::new(Vec::new()) };
    static RELEASING: Cell<bool> = const { Cell::new(false) };
}

// An abandoned chain of continuations is dropped link by link from a worklist, so its
// length is not bounded by the stack.
impl<T> Drop for ListenerChain<T> {
    fn drop(&mut self) {
        let mut orphans = Vec::new();
        while let Some(mut reaction) = self.pop_front() {
            orphans.extend(reaction.release());
        }
        if orphans.is_empty() {
            return;
        }

        let queued = ORPHANS.try_with(|queue| queue.borrow_mut().append(&mut orphans));
        if queued.is_err() || RELEASING.with(|releasing| releasing.replace(true)) {
            return;
        }

        while let Some(orphan) = ORPHANS.with(|queue| queue.borrow_mut().pop()) {
            drop(orphan);
        }
        RELEASING.with(|releasing| releasing.set(false));
    }
}

impl<T> Default for ListenerChain<T> {
    fn default() -> Self {
        Self {
            arena: Slab::new(),
            head: None,
            tail: None,
        }
    }
}

/// Continuation registered by [`Deferred::register`] and its wrappers.
pub(crate) struct ThenReaction<T, S> {
    pub(crate) zone: Zone,
    pub(crate) target: Deferred<S>,
    pub(crate) on_value: Rc<dyn Fn(T) -> Result<Outcome<S>, AsyncError>>,
    pub(crate) on_error: Option<RegisteredErrorHandler<S>>,
    pub(crate) test: Option<ErrorTest>,
}

impl<T: Clone + 'static, S: Clone + 'static> Reaction<T> for ThenReaction<T, S> {
    fn zone(&self) -> &Zone {
        &self.zone
    }

    fn fire(self: Box<Self>, result: Result<T, Failure>) {
        let ThenReaction {
            zone,
            target,
            on_value,
            on_error,
            test,
        } = *self;

        match result {
            Ok(value) => {
                let produced = zone.run_unary(|value| on_value(value), value);
                target.settle_from_handler(produced, None);
            }
            Err(failure) => recover(&zone, &target, on_error, test, failure),
        }
    }

    fn release(&mut self) -> Option<Box<dyn Any>> {
        self.target.take_orphaned_listeners()
    }
}

/// Continuation registered by [`Deferred::catch_error`].
pub(crate) struct CatchReaction<T> {
    pub(crate) zone: Zone,
    pub(crate) target: Deferred<T>,
    pub(crate) on_error: RegisteredErrorHandler<T>,
    pub(crate) test: Option<ErrorTest>,
}

impl<T: Clone + 'static> Reaction<T> for CatchReaction<T> {
    fn zone(&self) -> &Zone {
        &self.zone
    }

    fn fire(self: Box<Self>, result: Result<T, Failure>) {
        let CatchReaction {
            zone,
            target,
            on_error,
            test,
        } = *self;

        match result {
            Ok(value) => target.settle(Ok(value)),
            Err(failure) => recover(&zone, &target, Some(on_error), test, failure),
        }
    }

    fn release(&mut self) -> Option<Box<dyn Any>> {
        self.target.take_orphaned_listeners()
    }
}

// Runs a matching error handler, or forwards the failure unchanged.
fn recover<S: Clone + 'static>(
    zone: &Zone,
    target: &Deferred<S>,
    handler: Option<RegisteredErrorHandler<S>>,
    test: Option<ErrorTest>,
    failure: Failure,
) {
    let Some(handler) = handler else {
        target.settle(Err(failure));
        return;
    };

    let matches = match &test {
        Some(test) => zone.run_unary(|error: &AsyncError| test(error), &failure.error),
        None => true,
    };
    if !matches {
        target.settle(Err(failure));
        return;
    }

    let produced = zone.run_binary(
        |error, trace| handler(error, trace),
        failure.error.clone(),
        failure.trace.clone(),
    );
    target.settle_from_handler(produced, Some(&failure));
}

/// Action registered by [`Deferred::finally_do`].
pub(crate) struct FinallyReaction<T> {
    pub(crate) zone: Zone,
    pub(crate) target: Deferred<T>,
    pub(crate) action: Rc<dyn Fn() -> Result<Outcome<()>, AsyncError>>,
}

impl<T: Clone + 'static> Reaction<T> for FinallyReaction<T> {
    fn zone(&self) -> &Zone {
        &self.zone
    }

    fn fire(self: Box<Self>, result: Result<T, Failure>) {
        let FinallyReaction {
            zone,
            target,
            action,
        } = *self;

        match zone.run(|| action()) {
            Err(error) => target.settle_from_handler(Err(error), result.as_ref().err()),
            Ok(Outcome::Ready(())) => target.settle(result),
            Ok(Outcome::Chain(pending)) => zone.run(move || {
                pending.on_settled(move |waited| match waited {
                    Ok(()) => target.settle(result),
                    Err(failure) => target.settle(Err(failure)),
                })
            }),
        }
    }

    fn release(&mut self) -> Option<Box<dyn Any>> {
        self.target.take_orphaned_listeners()
    }
}

/// Plain callback registered by [`Deferred::on_settled`].
pub(crate) struct CallbackReaction<T> {
    pub(crate) zone: Zone,
    pub(crate) callback: Rc<dyn Fn(Result<T, Failure>)>,
}

impl<T: Clone + 'static> Reaction<T> for CallbackReaction<T> {
    fn zone(&self) -> &Zone {
        &self.zone
    }

    fn fire(self: Box<Self>, result: Result<T, Failure>) {
        let CallbackReaction { zone, callback } = *self;
        zone.run_unary(|result| callback(result), result);
    }
}

// Propagation steps. A step delivers one listener per call and returns true while it
// has listeners left.
type Step = Box<dyn FnMut() -> bool>;

thread_local! {
    static TRAMPOLINE: RefCell<Option<Vec<Step>>> = const { RefCell::new(None) };
}

struct TrampolineGuard;

impl Drop for TrampolineGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|trampoline| *trampoline.borrow_mut() = None);
    }
}

/// Runs `step` to exhaustion without growing the stack for nested settlements.
///
/// When called while a step is already running, `step` is parked and picked up by the
/// outer call. Steps parked by a step run in the order they were parked, all before that
/// step's remaining listeners, so propagation is depth-first as if it were recursive.
pub(crate) fn bounce(step: Step) {
    let nested = TRAMPOLINE.with(|trampoline| {
        let mut trampoline = trampoline.borrow_mut();
        match trampoline.as_mut() {
            Some(stack) => {
                stack.push(step);
                true
            }
            None => {
                *trampoline = Some(vec![step]);
                false
            }
        }
    });
    if nested {
        return;
    }

    let _guard = TrampolineGuard;
    loop {
        let next = TRAMPOLINE.with(|trampoline| {
            let mut trampoline = trampoline.borrow_mut();
            let stack = trampoline.as_mut()?;
            let step = stack.pop()?;
            Some((step, stack.len()))
        });
        let Some((mut step, depth)) = next else {
            break;
        };

        let more = step();
        TRAMPOLINE.with(|trampoline| {
            if let Some(stack) = trampoline.borrow_mut().as_mut() {
                stack[depth..].reverse();
                if more {
                    stack.insert(depth, step);
                }
            }
        });
    }
}

struct Restore(Option<Vec<Step>>);

impl Drop for Restore {
    fn drop(&mut self) {
        let parked = self.0.take();
        TRAMPOLINE.with(|trampoline| *trampoline.borrow_mut() = parked);
    }
}

/// Runs `f` with propagation started inside it finishing before `f` returns, even when
/// called from a listener. Steps already parked resume afterwards.
pub(crate) fn inline<R>(f: impl FnOnce() -> R) -> R {
    let parked = TRAMPOLINE.with(|trampoline| trampoline.borrow_mut().take());
    let _restore = Restore(parked);
    f()
}
