use crate::{
    task::{FetchKind, Stage},
    types::{BoxError, PoolId},
};
use core::time::Duration;
use thiserror::Error;

/// Every way an orchestration can fail.
///
/// Stage failures carry the stage that produced them, so the caller of
/// `Orchestrator::get_response` can tell which fetch or combine broke the
/// graph.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestrationError {
    /// Pool sizes or settings outside the accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// One of the four leaf fetches failed or panicked.
    #[error("fetch of {kind} failed: {source}")]
    Fetch {
        kind: FetchKind,
        #[source]
        source: BoxError,
    },
    /// A join or the final combination failed or panicked.
    #[error("combine stage {stage} failed: {source}")]
    Combine {
        stage: Stage,
        #[source]
        source: BoxError,
    },
    /// The waiter gave up before the graph completed.
    #[error("no result within {0:?}")]
    Timeout(Duration),
    /// A bounded pool refused a job because its pending queue is full.
    #[error("pool {pool} rejected submission: {capacity} jobs already pending")]
    PoolExhausted { pool: PoolId, capacity: usize },
    /// A job was submitted to a pool after it was released.
    #[error("pool {0} has been shut down")]
    PoolShutDown(PoolId),
    /// The OS refused to start the pool's worker threads.
    #[error("failed to build thread pool: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),
    /// The graph was dropped without ever producing an outcome.
    #[error("task graph was dropped before completing")]
    Abandoned,
}

/// Result alias used throughout the crate.
pub type Result<T, E = OrchestrationError> = core::result::Result<T, E>;

impl OrchestrationError {
    /// Stage whose failure produced this error, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Fetch { kind, .. } => Some(Stage::Fetch(*kind)),
            Self::Combine { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
