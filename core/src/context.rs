//! Per-execution context handed to every template hook.

use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

type ScopeKey = (TypeId, usize, SmallVec<[usize; 4]>);

static NEXT_EXECUTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(u64);

impl ExecutionId {
    fn next() -> Self {
        Self(NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec-{}", self.0)
    }
}

/// Lifecycle metadata for one execution.
///
/// Templates are shared across executions and only get `&self`, so anything a
/// template must remember about *this* request (a retry counter, a first
/// attempt timestamp) lives here, in [`ExecutionContext::scoped_state`]. The
/// execution owns the context and hooks run strictly one at a time, so no
/// locking is involved.
pub struct ExecutionContext {
    id: ExecutionId,
    started_at: Instant,
    attempts: usize,
    cycles: usize,
    cancellation: CancellationToken,
    // Index of the running template at each chain nesting level
    position: SmallVec<[usize; 4]>,
    scoped: HashMap<ScopeKey, Box<dyn Any + Send>>,
}

impl ExecutionContext {
    pub(crate) fn new(cancellation: CancellationToken) -> Self {
        Self {
            id: ExecutionId::next(),
            started_at: Instant::now(),
            attempts: 0,
            cycles: 0,
            cancellation,
            position: SmallVec::new(),
            scoped: HashMap::new(),
        }
    }

    /// Identifier of the execution.
    #[must_use]
    pub const fn id(&self) -> ExecutionId {
        self.id
    }

    /// Number of sends started so far.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// Number of times the lifecycle entered the `before_request` stage.
    #[must_use]
    pub const fn cycles(&self) -> usize {
        self.cycles
    }

    /// Time since the execution was started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Token observed by the execution's suspension points.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Mutable state of type `S` private to `owner` within this execution.
    ///
    /// The slot is keyed by the state type, the owner's address and the
    /// owner's position in the template chain (nested chains included). Two
    /// templates in one chain therefore never share state, even zero-sized
    /// ones behind a `Box`, and a template instance reused by another
    /// execution starts from `S::default()` there.
    ///
    /// A template that calls another template's hooks directly, rather than
    /// through a [`TemplateChain`](crate::TemplateChain), shares its chain
    /// position. If the inner template sits at offset 0 of the outer one,
    /// both resolve to the same slot for the same `S`; give them distinct
    /// state types.
    pub fn scoped_state<S, O>(&mut self, owner: &O) -> &mut S
    where
        S: Default + Send + 'static,
        O: ?Sized,
    {
        let key = (
            TypeId::of::<S>(),
            std::ptr::from_ref(owner).cast::<()>() as usize,
            self.position.clone(),
        );
        let slot = self
            .scoped
            .entry(key)
            .or_insert_with(|| Box::new(S::default()));
        match slot.downcast_mut::<S>() {
            Some(state) => state,
            None => unreachable!("scoped state slots are keyed by their own TypeId"),
        }
    }

    pub(crate) fn enter_template(&mut self, index: usize) {
        self.position.push(index);
    }

    pub(crate) fn leave_template(&mut self) {
        self.position.pop();
    }

    pub(crate) fn set_cancellation(&mut self, cancellation: CancellationToken) {
        self.cancellation = cancellation;
    }

    pub(crate) const fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub(crate) const fn record_cycle(&mut self) {
        self.cycles += 1;
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("attempts", &self.attempts)
            .field("cycles", &self.cycles)
            .field("elapsed", &self.elapsed())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
