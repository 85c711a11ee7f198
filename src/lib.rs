//! Fixed fan-out/fan-in task graph with configurable thread-pool placement.
//!
//! Each invocation issues four independent fetches, joins them pairwise, and
//! concatenates the two joins into one response:
//!
//! ```text
//!   posts   comments   albums   photos
//!       \   /              \   /
//!   posts+comments     albums+photos
//!              \         /
//!                 final
//! ```
//!
//! The graph never changes; what the caller chooses is which thread pool runs
//! each stage. A stage is submitted to its pool only when all of its
//! predecessors have produced a value, so no worker waits on another. The
//! calling thread parks on a single-fill gate until the graph delivers its
//! result or its first failure.
//!
//! Key modules:
//! - `pool`: the registry of rayon-backed pools (shared default pool, two
//!   dedicated combine workers, bounded per-invocation pools).
//! - `executor`: placement policies and the graph runtime.
//! - `gate`: the completion gate that hands the outcome to the waiting caller.
//! - `orchestrator`: the `get_response` facade.
//! - `task`: the graph's stages and the fetch/combine collaborator traits.
//!
//! Quick start:
//! 1. Build a `PoolRegistry` (or use `PoolRegistry::global`).
//! 2. Wrap your fetch and combine functions in an `Orchestrator`.
//! 3. Call `get_response(io_pool_size, fixed_worker_thread_for_non_io_tasks)`.

/// Registry and environment configuration.
pub mod config;
/// The crate's error type.
pub mod error;
/// Placement policies and the parallel graph runtime.
///
/// Contains the three canonical placement strategies, the policy value they
/// produce, and the dependency-triggered execution of the fixed graph.
pub mod executor;
/// Single-fill gate bridging the graph back to a blocked caller.
pub mod gate;
/// `get_response`: placement selection, execution and waiting in one call.
#[cfg(not(feature = "loom"))]
pub mod orchestrator;
/// Thread pools by role.
pub mod pool;
mod sync;
/// Graph stages and the collaborator traits for fetching and combining.
pub mod task;
/// Shared identifiers and aliases.
pub mod types;
mod utils;

pub use error::{OrchestrationError, Result};
#[cfg(not(feature = "loom"))]
pub use orchestrator::{Orchestrator, Response};
