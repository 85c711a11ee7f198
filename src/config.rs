use crate::error::{OrchestrationError, Result};
use core::{str::FromStr, time::Duration};

/// Sizing of the pools owned by a `PoolRegistry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Threads in each of the two dedicated combine workers.
    pub worker_threads: usize,
    /// Threads in the shared default pool; `None` means one per CPU.
    pub default_pool_threads: Option<usize>,
    /// Largest bounded pool a single invocation may create.
    pub max_io_pool_size: usize,
    /// Pending-job cap of each bounded pool; `None` accepts any number of
    /// jobs. The default pool and the dedicated workers are never capped.
    pub max_pending_jobs: Option<usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            default_pool_threads: None,
            max_io_pool_size: 512,
            max_pending_jobs: None,
        }
    }
}

impl RegistryConfig {
    /// Build from `FANIN_*` environment variables, falling back to defaults.
    ///
    /// # Errors
    /// If a variable is set but does not parse, or the result is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_opt)
    }

    /// Same as `from_env`, reading variables through `lookup`.
    ///
    /// # Errors
    /// If a variable is set but does not parse, or the result is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            worker_threads: parse_or(&lookup, "FANIN_WORKER_THREADS", defaults.worker_threads)?,
            default_pool_threads: parse_opt(&lookup, "FANIN_DEFAULT_POOL_THREADS")?,
            max_io_pool_size: parse_or(
                &lookup,
                "FANIN_MAX_IO_POOL_SIZE",
                defaults.max_io_pool_size,
            )?,
            max_pending_jobs: parse_opt(&lookup, "FANIN_MAX_PENDING_JOBS")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// If any thread count or cap is zero.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(invalid("worker_threads must be positive"));
        }
        if self.default_pool_threads == Some(0) {
            return Err(invalid("default_pool_threads must be positive"));
        }
        if self.max_io_pool_size == 0 {
            return Err(invalid("max_io_pool_size must be positive"));
        }
        if self.max_pending_jobs == Some(0) {
            return Err(invalid("max_pending_jobs must be positive"));
        }
        Ok(())
    }
}

/// Per-request placement settings for `Orchestrator::get_configured_response`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// `0` runs everything on the default pool, otherwise the size of the
    /// bounded pool created for each invocation.
    pub io_pool_size: i64,
    /// Run joins on the dedicated workers instead of the bounded pool.
    pub fixed_worker_thread_for_non_io_tasks: bool,
    /// Give up waiting after this long; `None` waits for the graph.
    pub timeout: Option<Duration>,
}

impl OrchestratorConfig {
    /// Build from `FANIN_*` environment variables, falling back to defaults.
    ///
    /// # Errors
    /// If a variable is set but does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_opt)
    }

    /// # Errors
    /// If a variable is set but does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            io_pool_size: parse_or(&lookup, "FANIN_IO_POOL_SIZE", 0)?,
            fixed_worker_thread_for_non_io_tasks: parse_or(
                &lookup,
                "FANIN_FIXED_WORKER_THREADS",
                false,
            )?,
            timeout: parse_opt::<u64>(&lookup, "FANIN_TIMEOUT_MS")?.map(Duration::from_millis),
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_opt<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    let Some(raw) = lookup(key).filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| invalid(&format!("{key}={raw:?} does not parse")))
}

fn parse_or<T: FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

fn invalid(reason: &str) -> OrchestrationError {
    OrchestrationError::InvalidConfig(reason.to_owned())
}
