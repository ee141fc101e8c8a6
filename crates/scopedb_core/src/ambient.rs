//! Ambient scope stacks, one per logical execution context.
//!
//! A logical execution context is an async task chain entered via
//! [`scope_async`] / [`spawn`], any other tokio task, or a plain thread.
//! Code asks for [`current`] and gets the installed task context if there
//! is one, then the running tokio task's own context, and otherwise the
//! calling thread's. Two unrelated flows therefore never observe each
//! other's scopes, and an async flow keeps its own stack across `.await`
//! even when the runtime moves it between worker threads.

use crate::error::{ScopeError, ScopeResult};
use crate::store::SessionStore;
use crate::types::{ContextId, ScopeId, ScopeKind, StoreId};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::task::Id as TaskId;

tokio::task_local! {
    static TASK_CONTEXT: Arc<AmbientContext>;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<Arc<AmbientContext>>> = const { RefCell::new(None) };
}

/// Contexts of tokio tasks spawned without one installed.
///
/// Entries are weak: a context lives as long as a scope on it does, and an
/// empty stack needs no entry.
static SPAWNED_CONTEXTS: Mutex<BTreeMap<TaskId, Weak<AmbientContext>>> =
    Mutex::new(BTreeMap::new());

/// One entry on an ambient stack.
#[derive(Clone)]
pub struct Frame {
    /// The scope this frame belongs to.
    pub scope_id: ScopeId,
    /// How the scope relates to its parent.
    pub kind: ScopeKind,
    /// Whether the scope is read-only.
    pub read_only: bool,
    /// The session store the scope uses (shared with its owner if joined).
    pub store: Arc<SessionStore>,
}

impl Frame {
    /// Returns the ID of the frame's session store.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.store.id()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("scope_id", &self.scope_id)
            .field("kind", &self.kind)
            .field("read_only", &self.read_only)
            .field("store", &self.store.id())
            .finish()
    }
}

/// The ambient scope stack of one logical execution context.
///
/// Frames are pushed on scope creation and popped on disposal in strict
/// LIFO order.
pub struct AmbientContext {
    id: ContextId,
    frames: Mutex<Vec<Frame>>,
}

impl AmbientContext {
    /// Creates a fresh, empty context.
    #[must_use]
    pub fn fresh() -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::next(),
            frames: Mutex::new(Vec::new()),
        })
    }

    /// Returns the context ID.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Pushes a frame.
    pub fn push(&self, frame: Frame) {
        self.frames.lock().push(frame);
    }

    /// Pops the frame of `scope_id`.
    ///
    /// # Errors
    ///
    /// `ScopeNestingViolation` if `scope_id` is not the top of the stack.
    /// The stack is left untouched.
    pub fn pop(&self, scope_id: ScopeId) -> ScopeResult<Frame> {
        let mut frames = self.frames.lock();
        let top = frames.last().map(|f| f.scope_id);
        match frames.pop() {
            Some(frame) if top == Some(scope_id) => Ok(frame),
            popped => {
                frames.extend(popped);
                Err(ScopeError::ScopeNestingViolation {
                    expected: top,
                    found: scope_id,
                })
            }
        }
    }

    /// Removes the frame of `scope_id` wherever it sits.
    ///
    /// Only used to repair the stack after a violation has been reported.
    pub fn remove(&self, scope_id: ScopeId) -> Option<Frame> {
        let mut frames = self.frames.lock();
        let index = frames.iter().rposition(|f| f.scope_id == scope_id)?;
        Some(frames.remove(index))
    }

    /// Returns the top frame.
    #[must_use]
    pub fn peek(&self) -> Option<Frame> {
        self.frames.lock().last().cloned()
    }

    /// Returns the number of frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    /// Returns true if no scope is ambient.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientContext")
            .field("id", &self.id)
            .field("frames", &*self.frames.lock())
            .finish()
    }
}

/// Returns the ambient context of the caller.
///
/// Inside [`scope_async`] this is the installed context. Inside any other
/// tokio task it is that task's own context, keyed by task ID. Otherwise it
/// is the calling thread's. Missing contexts are created on first use.
#[must_use]
pub fn current() -> Arc<AmbientContext> {
    if let Ok(context) = TASK_CONTEXT.try_with(Arc::clone) {
        return context;
    }
    if let Some(task) = tokio::task::try_id() {
        return task_context(task);
    }
    THREAD_CONTEXT.with(|slot| {
        Arc::clone(slot.borrow_mut().get_or_insert_with(AmbientContext::fresh))
    })
}

fn task_context(task: TaskId) -> Arc<AmbientContext> {
    let mut contexts = SPAWNED_CONTEXTS.lock();
    if let Some(context) = contexts.get(&task).and_then(Weak::upgrade) {
        return context;
    }
    contexts.retain(|_, context| context.strong_count() > 0);
    let context = AmbientContext::fresh();
    contexts.insert(task, Arc::downgrade(&context));
    tracing::trace!(%task, context = %context.id(), "created task context");
    context
}

/// Runs `future` as its own logical execution context with an empty stack.
///
/// Scopes created inside the future stay visible to it across `.await`
/// points and are invisible to every other task.
pub async fn scope_async<F: Future>(future: F) -> F::Output {
    TASK_CONTEXT.scope(AmbientContext::fresh(), future).await
}

/// Spawns `future` on the tokio runtime inside a fresh ambient context.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(scope_async(future))
}

/// Runs `f` synchronously with `context` installed as the ambient context.
///
/// Lets a caller hand its stack to code running on another thread, for
/// example inside `spawn_blocking`.
pub fn with_context<R>(context: Arc<AmbientContext>, f: impl FnOnce() -> R) -> R {
    TASK_CONTEXT.sync_scope(context, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use proptest::prelude::*;

    fn frame(kind: ScopeKind) -> Frame {
        Frame {
            scope_id: ScopeId::next(),
            kind,
            read_only: false,
            store: Arc::new(SessionStore::new(Arc::new(SessionRegistry::new()))),
        }
    }

    #[test]
    fn push_peek_pop() {
        let context = AmbientContext::fresh();
        let outer = frame(ScopeKind::Root);
        let inner = frame(ScopeKind::Joined);

        context.push(outer.clone());
        context.push(inner.clone());
        assert_eq!(context.depth(), 2);
        assert_eq!(context.peek().unwrap().scope_id, inner.scope_id);

        context.pop(inner.scope_id).unwrap();
        context.pop(outer.scope_id).unwrap();
        assert!(context.is_empty());
    }

    #[test]
    fn out_of_order_pop_is_a_violation() {
        let context = AmbientContext::fresh();
        let outer = frame(ScopeKind::Root);
        let inner = frame(ScopeKind::Joined);
        context.push(outer.clone());
        context.push(inner.clone());

        let err = context.pop(outer.scope_id).unwrap_err();
        match err {
            ScopeError::ScopeNestingViolation { expected, found } => {
                assert_eq!(expected, Some(inner.scope_id));
                assert_eq!(found, outer.scope_id);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(context.depth(), 2);
    }

    #[test]
    fn pop_on_empty_stack_is_a_violation() {
        let context = AmbientContext::fresh();
        let err = context.pop(ScopeId::next()).unwrap_err();
        assert!(matches!(
            err,
            ScopeError::ScopeNestingViolation { expected: None, .. }
        ));
    }

    #[test]
    fn remove_repairs_the_stack() {
        let context = AmbientContext::fresh();
        let outer = frame(ScopeKind::Root);
        let inner = frame(ScopeKind::Joined);
        context.push(outer.clone());
        context.push(inner.clone());

        assert!(context.remove(outer.scope_id).is_some());
        assert_eq!(context.depth(), 1);
        assert_eq!(context.peek().unwrap().scope_id, inner.scope_id);
    }

    #[test]
    fn threads_have_independent_contexts() {
        let here = current();
        let there = std::thread::spawn(|| current().id()).join().unwrap();
        assert_ne!(here.id(), there);
        assert_eq!(current().id(), here.id());
    }

    #[test]
    fn with_context_installs_the_given_context() {
        let injected = AmbientContext::fresh();
        let seen = with_context(Arc::clone(&injected), || current().id());
        assert_eq!(seen, injected.id());
        assert_ne!(current().id(), injected.id());
    }

    #[tokio::test]
    async fn tasks_have_independent_contexts() {
        let a = spawn(async { current().id() }).await.unwrap();
        let b = spawn(async { current().id() }).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn plain_tasks_have_independent_contexts() {
        let (held_tx, held_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = tokio::spawn(async move {
            let context = current();
            context.push(frame(ScopeKind::Root));
            let _ = held_tx.send(context.id());
            let _ = release_rx.await;
            (context.id(), current().id())
        });

        let held = held_rx.await.unwrap();
        let other = tokio::spawn(async { (current().id(), current().depth()) })
            .await
            .unwrap();
        assert_ne!(other.0, held);
        assert_eq!(other.1, 0);

        release_tx.send(()).unwrap();
        let (before, after) = holder.await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn plain_task_context_follows_the_task() {
        let (before, after) = tokio::spawn(async {
            let context = current();
            context.push(frame(ScopeKind::Root));
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
            (context.id(), current().id())
        })
        .await
        .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn task_context_survives_await() {
        let (before, after) = scope_async(async {
            let before = current().id();
            tokio::task::yield_now().await;
            (before, current().id())
        })
        .await;
        assert_eq!(before, after);
    }

    proptest! {
        // `true` pushes a frame; `false` tries to pop the frame at `depth`
        // positions below the top.
        #[test]
        fn only_the_top_frame_can_be_popped(ops in prop::collection::vec((any::<bool>(), 0usize..3), 0..40)) {
            let context = AmbientContext::fresh();
            let mut model: Vec<ScopeId> = Vec::new();

            for (push, depth) in ops {
                if push {
                    let f = frame(ScopeKind::Root);
                    model.push(f.scope_id);
                    context.push(f);
                    continue;
                }
                let Some(&target) = model.iter().rev().nth(depth) else {
                    continue;
                };
                let result = context.pop(target);
                if depth == 0 {
                    prop_assert_eq!(result.unwrap().scope_id, target);
                    model.pop();
                } else {
                    prop_assert!(result.is_err());
                }
                prop_assert_eq!(context.depth(), model.len());
            }
        }
    }
}
