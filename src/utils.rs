use crate::types::BoxError;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Run a collaborator, turning a panic into an ordinary error.
///
/// Pool workers must never unwind: the panic would escape the job and the
/// stage's outcome would never reach the gate.
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, BoxError>) -> Result<T, BoxError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Err(format!("panicked: {message}").into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_results() {
        assert_eq!(guarded(|| Ok::<_, BoxError>(3)).unwrap(), 3);
        let err = guarded(|| Err::<u8, BoxError>("nope".into())).unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn captures_panics() {
        let err = guarded::<u8>(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(err.to_string(), "panicked: boom 1");
        let err = guarded::<u8>(|| std::panic::panic_any(5_u32)).unwrap_err();
        assert_eq!(err.to_string(), "panicked: non-string panic payload");
    }
}
