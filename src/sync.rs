#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::sync::{
        Arc, Condvar, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU8, Ordering},
    };
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use std::sync::{
        Arc, Condvar, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU8, Ordering},
    };
}

pub(crate) use imp::*;

use std::sync::{LockResult, PoisonError};

/// Recovers the guard from a poisoned lock.
///
/// Every critical section in this crate leaves its data consistent before any
/// code that could panic runs, so a poisoned flag carries no information.
pub(crate) fn unpoison<G>(result: LockResult<G>) -> G {
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Locks `mutex`, ignoring poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    unpoison(mutex.lock())
}
