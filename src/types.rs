use crate::error::{OrchestrationError, Result};
use derive_more::Display;
use indexmap::IndexMap as _IndexMap;
use rand::Rng;
use rustc_hash::FxBuildHasher;

/// Boxed error returned by fetch and combine collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The string delivered through the completion gate.
pub type FinalResult = String;

/// `IndexMap` type with fast hasher.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;

/// Identifier of the user whose data both joins of one invocation emphasise.
///
/// Chosen once per invocation and shared, by value, with both join stages.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{_0}")]
pub struct UserContext(u8);

impl UserContext {
    /// Smallest valid user id.
    pub const MIN: u8 = 1;
    /// Largest valid user id.
    pub const MAX: u8 = 10;

    /// # Errors
    /// If `id` is outside `MIN..=MAX`.
    pub fn new(id: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&id) {
            Ok(Self(id))
        } else {
            Err(OrchestrationError::InvalidConfig(format!(
                "user context {id} outside {}..={}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    /// Uniformly random user id in `MIN..=MAX`.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(Self::MIN..=Self::MAX))
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Identity of a thread pool, stable for the pool's lifetime.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PoolId {
    /// The registry's shared general-purpose pool.
    #[display("default")]
    Default,
    /// One of the long-lived dedicated combine workers.
    #[display("{_0}")]
    Worker(crate::pool::WorkerPool),
    /// A bounded pool created for a single invocation.
    #[display("io-{_0}")]
    Bounded(u64),
}
