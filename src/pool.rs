use crate::{
    config::RegistryConfig,
    error::{OrchestrationError, Result},
    types::{IndexMap, PoolId},
};
use core::{
    cell::Cell,
    str::FromStr,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};
use derive_more::{Debug, Display};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{Arc, OnceLock, RwLock};

/// The two long-lived dedicated combine workers.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerPool {
    #[display("worker1")]
    Worker1,
    #[display("worker2")]
    Worker2,
}

impl WorkerPool {
    pub const ALL: [Self; 2] = [Self::Worker1, Self::Worker2];
}

impl FromStr for WorkerPool {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "worker1" => Ok(Self::Worker1),
            "worker2" => Ok(Self::Worker2),
            _ => Err(OrchestrationError::InvalidConfig(format!(
                "unknown worker pool {s:?}"
            ))),
        }
    }
}

thread_local! {
    static CURRENT_POOL: Cell<Option<PoolId>> = const { Cell::new(None) };
}

/// Pool running the current thread's job, or `None` outside pool jobs.
#[must_use]
pub fn current_pool() -> Option<PoolId> {
    CURRENT_POOL.with(Cell::get)
}

/// Cheap, cloneable reference to a thread pool.
///
/// All clones refer to the same workers. Once `shutdown` is called, the
/// workers finish what was already submitted and exit, and every further
/// `spawn` is rejected.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    id: PoolId,
    threads: usize,
    max_pending: Option<usize>,
    pending: Arc<AtomicUsize>,
    /// Registry count of open bounded pools, decremented on release.
    open: Option<Arc<AtomicUsize>>,
    #[debug(skip)]
    pool: RwLock<Option<ThreadPool>>,
}

/// Bookkeeping of one running job, restored even if the job unwinds.
struct JobScope {
    previous: Option<PoolId>,
    pending: Arc<AtomicUsize>,
}

impl JobScope {
    fn enter(id: PoolId, pending: Arc<AtomicUsize>) -> Self {
        let previous = CURRENT_POOL.with(|current| current.replace(Some(id)));
        Self { previous, pending }
    }
}

impl Drop for JobScope {
    fn drop(&mut self) {
        CURRENT_POOL.with(|current| current.set(self.previous));
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PoolHandle {
    fn build(
        id: PoolId,
        threads: Option<usize>,
        max_pending: Option<usize>,
        open: Option<Arc<AtomicUsize>>,
    ) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new()
            .thread_name(move |idx| format!("fanin-{id}-{idx}"))
            .panic_handler(move |_| tracing::error!(pool = %id, "job panicked"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;
        if let Some(open) = &open {
            open.fetch_add(1, Ordering::AcqRel);
        }
        tracing::debug!(pool = %id, threads = pool.current_num_threads(), "pool started");
        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                threads: pool.current_num_threads(),
                max_pending,
                pending: Arc::new(AtomicUsize::new(0)),
                open,
                pool: RwLock::new(Some(pool)),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    /// Jobs submitted but not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        crate::sync::unpoison(self.inner.pool.read()).is_none()
    }

    /// Queue `job` on this pool.
    ///
    /// # Errors
    /// `PoolShutDown` after `shutdown`, `PoolExhausted` when the pending cap
    /// is reached.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let PoolInner {
            id,
            max_pending,
            pending,
            pool,
            ..
        } = &*self.inner;
        let guard = crate::sync::unpoison(pool.read());
        let Some(pool) = guard.as_ref() else {
            return Err(OrchestrationError::PoolShutDown(*id));
        };
        let queued = pending.fetch_add(1, Ordering::AcqRel);
        if let Some(capacity) = *max_pending {
            if queued >= capacity {
                pending.fetch_sub(1, Ordering::AcqRel);
                return Err(OrchestrationError::PoolExhausted {
                    pool: *id,
                    capacity,
                });
            }
        }
        let id = *id;
        let pending = Arc::clone(pending);
        pool.spawn(move || {
            let _scope = JobScope::enter(id, pending);
            job();
        });
        Ok(())
    }

    /// Stop accepting jobs and let the workers exit once their queue drains.
    ///
    /// Idempotent. Never blocks on the workers.
    pub fn shutdown(&self) {
        let released = crate::sync::unpoison(self.inner.pool.write()).take();
        if released.is_some() {
            if let Some(open) = &self.inner.open {
                open.fetch_sub(1, Ordering::AcqRel);
            }
            tracing::debug!(pool = %self.inner.id, "pool released");
        }
    }
}

/// Owns the default pool and the two dedicated workers, and creates bounded
/// per-invocation pools.
///
/// The dedicated workers are created once, with the registry, and shared by
/// every invocation that uses it. They are released only by `shutdown`.
/// The default pool and the workers accept any number of pending jobs; the
/// configured pending cap applies to bounded pools only.
#[derive(Debug)]
pub struct PoolRegistry {
    config: RegistryConfig,
    default: PoolHandle,
    workers: IndexMap<WorkerPool, PoolHandle>,
    next_bounded: AtomicU64,
    open_bounded: Arc<AtomicUsize>,
}

static GLOBAL: OnceLock<Arc<PoolRegistry>> = OnceLock::new();

impl PoolRegistry {
    /// Start the default pool and both dedicated workers.
    ///
    /// # Errors
    /// If `config` is invalid or a pool cannot be started.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let default = PoolHandle::build(PoolId::Default, config.default_pool_threads, None, None)?;
        let workers: IndexMap<WorkerPool, PoolHandle> = WorkerPool::ALL
            .into_iter()
            .map(|name| -> Result<(WorkerPool, PoolHandle)> {
                let threads = Some(config.worker_threads);
                let pool = PoolHandle::build(PoolId::Worker(name), threads, None, None)?;
                Ok((name, pool))
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            config,
            default,
            workers,
            next_bounded: AtomicU64::new(1),
            open_bounded: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Install the process-wide registry. Call once at start-up.
    ///
    /// # Errors
    /// If the registry cannot be built or one is already installed.
    pub fn init(config: RegistryConfig) -> Result<Arc<Self>> {
        let registry = Arc::new(Self::new(config)?);
        GLOBAL.set(Arc::clone(&registry)).map_err(|_| {
            OrchestrationError::InvalidConfig("process registry already initialised".to_owned())
        })?;
        Ok(registry)
    }

    /// The process-wide registry, built from `RegistryConfig::from_env` on
    /// first use unless `init` ran earlier.
    ///
    /// # Errors
    /// If the environment holds an invalid configuration or a pool cannot be
    /// started.
    pub fn global() -> Result<Arc<Self>> {
        if let Some(registry) = GLOBAL.get() {
            return Ok(Arc::clone(registry));
        }
        let registry = Arc::new(Self::new(RegistryConfig::from_env()?)?);
        // Lost a race with another initialiser: drop ours, use theirs.
        let installed = GLOBAL.get_or_init(|| registry);
        Ok(Arc::clone(installed))
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a pool of exactly `size` threads, owned by the caller.
    ///
    /// The caller releases it with `PoolHandle::shutdown` when done.
    ///
    /// # Errors
    /// `InvalidConfig` if `size` is zero or above `max_io_pool_size`.
    pub fn create_bounded_pool(&self, size: usize) -> Result<PoolHandle> {
        if size == 0 || size > self.config.max_io_pool_size {
            return Err(OrchestrationError::InvalidConfig(format!(
                "bounded pool size {size} outside 1..={}",
                self.config.max_io_pool_size
            )));
        }
        let id = PoolId::Bounded(self.next_bounded.fetch_add(1, Ordering::Relaxed));
        PoolHandle::build(
            id,
            Some(size),
            self.config.max_pending_jobs,
            Some(Arc::clone(&self.open_bounded)),
        )
    }

    /// Bounded pools created and not yet shut down.
    #[must_use]
    pub fn open_bounded_pools(&self) -> usize {
        self.open_bounded.load(Ordering::Acquire)
    }

    /// The shared general-purpose pool.
    #[must_use]
    pub fn default_pool(&self) -> PoolHandle {
        self.default.clone()
    }

    /// One of the two dedicated combine workers.
    #[must_use]
    pub fn named_worker_pool(&self, name: WorkerPool) -> PoolHandle {
        self.workers[&name].clone()
    }

    /// Release the default pool and both workers. For process teardown.
    pub fn shutdown(&self) {
        self.default.shutdown();
        for pool in self.workers.values() {
            pool.shutdown();
        }
    }
}
