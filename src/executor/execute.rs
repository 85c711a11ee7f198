use crate::{
    error::OrchestrationError,
    executor::PoolPlacementPolicy,
    gate::Completer,
    pool,
    sync::{AtomicBool, AtomicU8, Mutex, Ordering, lock},
    task::{Combine, Fetch, FetchKind, JoinKind, Stage, StageObserver},
    types::{BoxError, FinalResult, UserContext},
    utils::guarded,
};
use std::sync::Arc;

/// State of one running invocation, shared by all of its jobs.
///
/// Each slot is written by exactly one stage and taken by exactly one
/// consumer. A consumer is submitted by whichever predecessor finishes last,
/// as decided by `Progress`.
pub(super) struct Graph<F, C> {
    fetcher: Arc<F>,
    combiner: Arc<C>,
    observer: Option<Arc<dyn StageObserver>>,
    policy: PoolPlacementPolicy,
    ctx: UserContext,
    /// Indexed by `FetchKind::index`.
    leaves: [Mutex<Option<String>>; 4],
    /// Indexed by `JoinKind::index`.
    joins: [Mutex<Option<String>>; 2],
    progress: Progress,
    completer: Completer<FinalResult>,
}

/// Parent counters and the termination flag of one invocation.
///
/// A stage stores its output before reporting itself done; the report that
/// brings a child's counter to zero hands the child to its caller, unless the
/// graph was terminated.
pub(super) struct Progress {
    /// Predecessors of each join that haven't finished yet.
    join_parents_left: [AtomicU8; 2],
    /// Joins that haven't finished yet.
    final_parents_left: AtomicU8,
    /// Set by the first failure. Nothing is submitted afterwards.
    terminated: AtomicBool,
}

impl Progress {
    pub(super) fn new() -> Self {
        Self {
            join_parents_left: core::array::from_fn(|_| AtomicU8::new(2)),
            final_parents_left: AtomicU8::new(2),
            terminated: AtomicBool::new(false),
        }
    }

    /// Fetch `kind` stored its payload. Returns the join to submit, if any.
    pub(super) fn fetch_done(&self, kind: FetchKind) -> Option<JoinKind> {
        let join = kind.consumer();
        self.release(&self.join_parents_left[join.index()]).then_some(join)
    }

    /// A join stored its output. Returns whether to submit the final join.
    pub(super) fn join_done(&self) -> bool {
        self.release(&self.final_parents_left)
    }

    fn release(&self, parents_left: &AtomicU8) -> bool {
        // AcqRel: the last decrement observes every other parent's slot write.
        parents_left.fetch_sub(1, Ordering::AcqRel) == 1 && !self.is_terminated()
    }

    /// Returns `true` for the first caller only.
    pub(super) fn terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    pub(super) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl<F: Fetch, C: Combine> Graph<F, C> {
    pub(super) fn new(
        fetcher: Arc<F>,
        combiner: Arc<C>,
        observer: Option<Arc<dyn StageObserver>>,
        policy: PoolPlacementPolicy,
        ctx: UserContext,
        completer: Completer<FinalResult>,
    ) -> Self {
        Self {
            fetcher,
            combiner,
            observer,
            policy,
            ctx,
            leaves: core::array::from_fn(|_| Mutex::new(None)),
            joins: core::array::from_fn(|_| Mutex::new(None)),
            progress: Progress::new(),
            completer,
        }
    }

    /// Submit the four leaves. Stops at the first rejected submission.
    pub(super) fn start(self: &Arc<Self>) {
        tracing::debug!(user = %self.ctx, "starting graph");
        for kind in FetchKind::ALL {
            if !self.submit(Stage::Fetch(kind)) {
                break;
            }
        }
    }

    /// Queue `stage` on its pool. A rejection terminates the graph.
    fn submit(self: &Arc<Self>, stage: Stage) -> bool {
        let pool = self.policy.pool_for(stage);
        let graph = Arc::clone(self);
        match pool.spawn(move || graph.exec(stage)) {
            Ok(()) => true,
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    fn exec(self: &Arc<Self>, stage: Stage) {
        if self.progress.is_terminated() {
            tracing::trace!(%stage, "skipping stage of terminated graph");
            return;
        }
        let pool = pool::current_pool();
        tracing::debug!(%stage, pool = ?pool, user = %self.ctx, "stage started");
        if let (Some(observer), Some(pool)) = (&self.observer, pool) {
            let observed = guarded(|| {
                observer.on_stage(stage, pool);
                Ok(())
            });
            if let Err(source) = observed {
                self.fail(stage_failure(stage, source));
                return;
            }
        }
        match stage {
            Stage::Fetch(kind) => self.exec_fetch(kind),
            Stage::Join(kind) => self.exec_join(kind),
            Stage::Final => self.exec_final(),
        }
    }

    fn exec_fetch(self: &Arc<Self>, kind: FetchKind) {
        match guarded(|| self.fetcher.fetch(kind)) {
            Ok(payload) => {
                *lock(&self.leaves[kind.index()]) = Some(payload);
                if let Some(join) = self.progress.fetch_done(kind) {
                    self.submit(Stage::Join(join));
                }
            }
            Err(source) => self.fail(OrchestrationError::Fetch { kind, source }),
        }
    }

    fn exec_join(self: &Arc<Self>, kind: JoinKind) {
        let stage = Stage::Join(kind);
        let (left, right) = kind.inputs();
        let (Some(left), Some(right)) = (self.take_leaf(left), self.take_leaf(right)) else {
            self.fail(missing_input(stage));
            return;
        };
        match guarded(|| self.combiner.combine(kind, self.ctx, left, right)) {
            Ok(joined) => {
                *lock(&self.joins[kind.index()]) = Some(joined);
                if self.progress.join_done() {
                    self.submit(Stage::Final);
                }
            }
            Err(source) => self.fail(OrchestrationError::Combine { stage, source }),
        }
    }

    fn exec_final(&self) {
        let [first, second] = JoinKind::ALL.map(|kind| lock(&self.joins[kind.index()]).take());
        let (Some(first), Some(second)) = (first, second) else {
            self.fail(missing_input(Stage::Final));
            return;
        };
        tracing::debug!(
            thread = std::thread::current().name().unwrap_or("<unnamed>"),
            "building response"
        );
        self.completer.complete(Ok(first + &second));
    }

    fn take_leaf(&self, kind: FetchKind) -> Option<String> {
        lock(&self.leaves[kind.index()]).take()
    }

    /// Record `err` as the terminal outcome if nothing terminated the graph
    /// before.
    fn fail(&self, err: OrchestrationError) {
        if !self.progress.terminate() {
            tracing::debug!(error = %err, "discarding failure of terminated graph");
            return;
        }
        tracing::warn!(error = %err, user = %self.ctx, "graph failed");
        self.completer.complete(Err(err));
    }
}

/// `source` as the failure of `stage`.
fn stage_failure(stage: Stage, source: BoxError) -> OrchestrationError {
    match stage {
        Stage::Fetch(kind) => OrchestrationError::Fetch { kind, source },
        Stage::Join(_) | Stage::Final => OrchestrationError::Combine { stage, source },
    }
}

fn missing_input(stage: Stage) -> OrchestrationError {
    OrchestrationError::Combine {
        stage,
        source: format!("input of {stage} was already consumed").into(),
    }
}
