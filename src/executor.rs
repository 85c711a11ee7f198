mod execute;
mod setup;

/// Canonical placements selected from `(io_pool_size, fixed_worker_thread)`
/// and the pools they own.
pub use crate::executor::setup::{OwnedPool, Placement, PlacementStrategy};
use crate::{
    error::{OrchestrationError, Result},
    executor::execute::Graph,
    gate::{self, AsyncHandle},
    pool::PoolHandle,
    task::{Combine, Fetch, FetchKind, JoinKind, Stage, StageObserver},
    types::{FinalResult, UserContext},
    utils::guarded,
};
use derive_more::Debug;
use std::sync::Arc;

/// Which pool runs each stage of the graph for one invocation.
///
/// Every stage has exactly one pool. The canonical strategies only use a few
/// distinct assignments, but any mapping is accepted.
#[must_use]
#[derive(Debug, Clone)]
pub struct PoolPlacementPolicy {
    /// Indexed by `FetchKind::index`.
    fetch: [PoolHandle; 4],
    /// Indexed by `JoinKind::index`.
    join: [PoolHandle; 2],
    final_join: PoolHandle,
}

impl PoolPlacementPolicy {
    /// Run every stage on `pool`.
    pub fn uniform(pool: &PoolHandle) -> Self {
        Self {
            fetch: core::array::from_fn(|_| pool.clone()),
            join: core::array::from_fn(|_| pool.clone()),
            final_join: pool.clone(),
        }
    }

    /// Run all four fetches on `pool`.
    pub fn with_fetch_pool(mut self, pool: &PoolHandle) -> Self {
        self.fetch = core::array::from_fn(|_| pool.clone());
        self
    }

    pub fn with_join_pool(mut self, kind: JoinKind, pool: &PoolHandle) -> Self {
        self.join[kind.index()] = pool.clone();
        self
    }

    pub fn with_final_pool(mut self, pool: &PoolHandle) -> Self {
        self.final_join = pool.clone();
        self
    }

    /// Assign one stage, whatever its kind.
    pub fn with_stage_pool(mut self, stage: Stage, pool: &PoolHandle) -> Self {
        match stage {
            Stage::Fetch(kind) => self.fetch[kind.index()] = pool.clone(),
            Stage::Join(kind) => self.join[kind.index()] = pool.clone(),
            Stage::Final => self.final_join = pool.clone(),
        }
        self
    }

    /// The pool `stage` is submitted to.
    #[must_use]
    pub fn pool_for(&self, stage: Stage) -> &PoolHandle {
        match stage {
            Stage::Fetch(kind) => &self.fetch[kind.index()],
            Stage::Join(kind) => &self.join[kind.index()],
            Stage::Final => &self.final_join,
        }
    }
}

/// Runs the fixed graph: four fetches, two joins, one final concatenation.
///
/// Each stage is submitted to its pool only once all of its predecessors have
/// produced a value, so no worker ever blocks on another. The first failure
/// terminates the graph; stages already running finish, but nothing further
/// is submitted and their results are discarded.
#[must_use]
#[derive(Debug)]
pub struct Executor<F, C> {
    #[debug(skip)]
    fetcher: Arc<F>,
    #[debug(skip)]
    combiner: Arc<C>,
    #[debug(skip)]
    observer: Option<Arc<dyn StageObserver>>,
}

impl<F: Fetch, C: Combine> Executor<F, C> {
    pub fn new(fetcher: F, combiner: C) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            combiner: Arc::new(combiner),
            observer: None,
        }
    }

    /// Report `(stage, executing pool)` to `observer` as each stage starts.
    pub fn with_observer(mut self, observer: impl StageObserver) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Start the graph under `policy`, with `ctx` shared by both joins.
    ///
    /// Returns immediately. The handle completes exactly once, with the
    /// concatenated joins or with the first failure.
    pub fn run(&self, policy: &PoolPlacementPolicy, ctx: UserContext) -> AsyncHandle<FinalResult> {
        let (completer, handle) = gate::channel();
        let graph = Arc::new(Graph::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.combiner),
            self.observer.clone(),
            policy.clone(),
            ctx,
            completer,
        ));
        graph.start();
        handle
    }

    /// Reference run: every fetch and combine in program order on the calling
    /// thread. Produces the same string as `run` for the same collaborators.
    ///
    /// # Errors
    /// The first fetch or combine failure, in program order.
    pub fn run_sequential(&self, ctx: UserContext) -> Result<FinalResult> {
        let mut payloads = Vec::with_capacity(FetchKind::ALL.len());
        for kind in FetchKind::ALL {
            let payload = guarded(|| self.fetcher.fetch(kind))
                .map_err(|source| OrchestrationError::Fetch { kind, source })?;
            payloads.push(Some(payload));
        }
        let mut response = String::new();
        for kind in JoinKind::ALL {
            let (left, right) = kind.inputs();
            let left = payloads[left.index()].take().unwrap_or_default();
            let right = payloads[right.index()].take().unwrap_or_default();
            let joined = guarded(|| self.combiner.combine(kind, ctx, left, right)).map_err(
                |source| OrchestrationError::Combine {
                    stage: Stage::Join(kind),
                    source,
                },
            )?;
            response.push_str(&joined);
        }
        Ok(response)
    }
}
