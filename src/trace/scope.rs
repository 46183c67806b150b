//! Per-task binding of the active [`TraceContext`].
//!
//! The binding lives in a tokio task-local slot, so every request future sees
//! only the context it was scoped with. Code running outside any scope (boot
//! time checks, background jobs) simply observes no context.

use std::cell::RefCell;
use std::future::Future;

use futures::future::Either;

use super::context::TraceContext;
use super::ids::IdGenerator;

tokio::task_local! {
    static ACTIVE_CONTEXT: RefCell<Option<TraceContext>>;
}

/// Run `fut` with `ctx` bound as the current context.
///
/// The binding is released when the returned future completes or is dropped,
/// including on panic and cancellation.
pub fn scope<F>(ctx: TraceContext, fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    ACTIVE_CONTEXT.scope(RefCell::new(Some(ctx)), fut)
}

/// Synchronous counterpart of [`scope`].
pub fn sync_scope<R>(ctx: TraceContext, f: impl FnOnce() -> R) -> R {
    ACTIVE_CONTEXT.sync_scope(RefCell::new(Some(ctx)), f)
}

/// The context bound to the running task, if any.
pub fn current() -> Option<TraceContext> {
    ACTIVE_CONTEXT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// A child context for a downstream call, or `None` outside any scope.
pub fn derive_for_outbound_call(ids: &IdGenerator) -> Option<TraceContext> {
    current().map(|ctx| ctx.derive_child(ids))
}

/// Drop the binding for the running task. A no-op outside any scope.
pub fn clear() {
    let _ = ACTIVE_CONTEXT.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            slot.take();
        }
    });
}

/// Carry the caller's context into a future that is about to be spawned.
///
/// Task-locals do not follow `tokio::spawn`; wrap the spawned future with
/// this to keep its logs and outbound calls correlated.
pub fn propagate<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    match current() {
        Some(ctx) => Either::Left(scope(ctx, fut)),
        None => Either::Right(fut),
    }
}

/// Clears the current binding when dropped.
#[must_use = "the binding is cleared when the guard is dropped"]
#[derive(Debug, Default)]
pub struct TeardownGuard {
    _private: (),
}

impl TeardownGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        clear();
    }
}
