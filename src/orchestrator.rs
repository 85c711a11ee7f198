use crate::{
    config::OrchestratorConfig,
    error::Result,
    executor::{Executor, PlacementStrategy},
    pool::PoolRegistry,
    task::{Combine, Fetch, StageObserver},
    types::{FinalResult, UserContext},
};
use core::time::Duration;
use derive_more::Debug;
use std::sync::Arc;

/// A delivered response and the user context it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub user_context: UserContext,
    pub body: FinalResult,
}

/// Single entry point: choose a placement, run the graph, wait for it.
///
/// Cheap to share between request threads; concurrent calls are independent
/// except for the registry's default pool and dedicated workers.
#[derive(Debug)]
pub struct Orchestrator<F, C> {
    registry: Arc<PoolRegistry>,
    executor: Executor<F, C>,
    user_context: Option<UserContext>,
    timeout: Option<Duration>,
    config: OrchestratorConfig,
}

impl<F: Fetch, C: Combine> Orchestrator<F, C> {
    pub fn new(registry: Arc<PoolRegistry>, fetcher: F, combiner: C) -> Self {
        Self {
            registry,
            executor: Executor::new(fetcher, combiner),
            user_context: None,
            timeout: None,
            config: OrchestratorConfig::default(),
        }
    }

    /// Apply `config` to this orchestrator: its timeout, and the placement used
    /// by `get_configured_response`.
    #[must_use]
    pub fn from_config(
        config: OrchestratorConfig,
        registry: Arc<PoolRegistry>,
        fetcher: F,
        combiner: C,
    ) -> Self {
        let mut orchestrator = Self::new(registry, fetcher, combiner);
        orchestrator.timeout = config.timeout;
        orchestrator.config = config;
        orchestrator
    }

    /// Use `ctx` for every invocation instead of a random user.
    #[must_use]
    pub fn with_user_context(mut self, ctx: UserContext) -> Self {
        self.user_context = Some(ctx);
        self
    }

    /// Stop waiting after `timeout` and fail with `Timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl StageObserver) -> Self {
        self.executor = self.executor.with_observer(observer);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Run one invocation and return the concatenated joins.
    ///
    /// # Errors
    /// `InvalidConfig` before anything is submitted, or the graph's first
    /// failure, or `Timeout` if a timeout is set and expires.
    pub fn get_response(
        &self,
        io_pool_size: i64,
        fixed_worker_thread_for_non_io_tasks: bool,
    ) -> Result<FinalResult> {
        self.respond(io_pool_size, fixed_worker_thread_for_non_io_tasks)
            .map(|response| response.body)
    }

    /// `get_response` with the placement from the stored `OrchestratorConfig`.
    ///
    /// # Errors
    /// See `get_response`.
    pub fn get_configured_response(&self) -> Result<FinalResult> {
        self.get_response(
            self.config.io_pool_size,
            self.config.fixed_worker_thread_for_non_io_tasks,
        )
    }

    /// Like `get_response`, also reporting the user context that was used.
    ///
    /// # Errors
    /// See `get_response`.
    pub fn respond(
        &self,
        io_pool_size: i64,
        fixed_worker_thread_for_non_io_tasks: bool,
    ) -> Result<Response> {
        let strategy =
            PlacementStrategy::select(io_pool_size, fixed_worker_thread_for_non_io_tasks)?;
        // Released when this call returns, whatever the outcome.
        let placement = strategy.place(&self.registry)?;
        let user_context = self.user_context.unwrap_or_else(UserContext::random);

        let handle = self.executor.run(&placement.policy, user_context);
        let outcome = match self.timeout {
            Some(timeout) => handle.wait_timeout(timeout),
            None => handle.wait(),
        };
        drop(placement);

        let body = outcome?;
        tracing::info!(
            thread = std::thread::current().name().unwrap_or("<unnamed>"),
            strategy = %strategy,
            user = %user_context,
            "sending response"
        );
        Ok(Response { user_context, body })
    }
}
