use crate::{
    error::{OrchestrationError, Result},
    executor::PoolPlacementPolicy,
    pool::{PoolHandle, PoolRegistry, WorkerPool},
    task::JoinKind,
};
use core::num::NonZeroUsize;
use derive_more::Display;

/// The three canonical ways to place the graph on pools.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum PlacementStrategy {
    /// Fetches and joins all run on the registry's default pool.
    #[display("default-pool")]
    DefaultPool,
    /// Fetches run on a fresh bounded pool of the given size; the first join
    /// and the final join run on `Worker1`, the second join on `Worker2`.
    #[display("dedicated-workers({_0})")]
    DedicatedWorkers(NonZeroUsize),
    /// Fetches and joins all run on one fresh bounded pool of the given size.
    #[display("shared-io-pool({_0})")]
    SharedIoPool(NonZeroUsize),
}

impl PlacementStrategy {
    /// Pick the strategy for a request.
    ///
    /// # Errors
    /// `InvalidConfig` if `io_pool_size` is negative.
    pub fn select(io_pool_size: i64, fixed_worker_thread_for_non_io_tasks: bool) -> Result<Self> {
        let size = usize::try_from(io_pool_size).map_err(|_| {
            OrchestrationError::InvalidConfig(format!(
                "io pool size must be non-negative, got {io_pool_size}"
            ))
        })?;
        Ok(match NonZeroUsize::new(size) {
            None => Self::DefaultPool,
            Some(size) if fixed_worker_thread_for_non_io_tasks => Self::DedicatedWorkers(size),
            Some(size) => Self::SharedIoPool(size),
        })
    }

    /// Build the policy, creating the bounded pool this strategy needs.
    ///
    /// # Errors
    /// `InvalidConfig` if the registry refuses the pool size, or
    /// `PoolBuild` if its threads cannot be started. No task has been
    /// submitted when this fails.
    pub fn place(self, registry: &PoolRegistry) -> Result<Placement> {
        let placement = match self {
            Self::DefaultPool => Placement {
                policy: PoolPlacementPolicy::uniform(&registry.default_pool()),
                owned: None,
            },
            Self::DedicatedWorkers(size) => {
                let io = registry.create_bounded_pool(size.get())?;
                let worker1 = registry.named_worker_pool(WorkerPool::Worker1);
                let worker2 = registry.named_worker_pool(WorkerPool::Worker2);
                Placement {
                    policy: PoolPlacementPolicy::uniform(&worker1)
                        .with_fetch_pool(&io)
                        .with_join_pool(JoinKind::AlbumsAndPhotos, &worker2),
                    owned: Some(OwnedPool(io)),
                }
            }
            Self::SharedIoPool(size) => {
                let io = registry.create_bounded_pool(size.get())?;
                Placement {
                    policy: PoolPlacementPolicy::uniform(&io),
                    owned: Some(OwnedPool(io)),
                }
            }
        };
        tracing::debug!(strategy = %self, "placement built");
        Ok(placement)
    }
}

/// A policy together with the pool created for it, if any.
#[must_use]
#[derive(Debug)]
pub struct Placement {
    pub policy: PoolPlacementPolicy,
    pub owned: Option<OwnedPool>,
}

/// A bounded pool that belongs to one invocation. Released on drop.
#[derive(Debug)]
pub struct OwnedPool(PoolHandle);

impl OwnedPool {
    #[must_use]
    pub fn handle(&self) -> &PoolHandle {
        &self.0
    }
}

impl Drop for OwnedPool {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}
