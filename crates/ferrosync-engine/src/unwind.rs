//! Cleanup combinators for fallible async actions

use ferrosync_types::{Error, Result};
use std::future::Future;
use tracing::warn;

/// Run `action`; on a transient failure run `cleanup` and re-raise the failure
///
/// Fatal failures and successes skip the cleanup. If the cleanup itself fails,
/// the result is a fatal error describing both failures.
pub async fn unwind_protect<T, A, C, CF>(action: A, cleanup: C) -> Result<T>
where
    A: Future<Output = Result<T>>,
    C: FnOnce(&Error) -> CF,
    CF: Future<Output = Result<()>>,
{
    match action.await {
        Ok(value) => Ok(value),
        Err(error) if error.is_transient() => match cleanup(&error).await {
            Ok(()) => Err(error),
            Err(cleanup_error) => Err(Error::fatal(format!(
                "cleanup after '{}' failed: {}",
                error, cleanup_error
            ))),
        },
        Err(error) => Err(error),
    }
}

/// Run `action`, then run `cleanup` exactly once whatever the result
///
/// A cleanup failure after a successful action is returned. After a failed
/// action the original failure wins and the cleanup failure is only logged.
pub async fn finalize<T, A, C, CF>(action: A, cleanup: C) -> Result<T>
where
    A: Future<Output = Result<T>>,
    C: FnOnce() -> CF,
    CF: Future<Output = Result<()>>,
{
    let result = action.await;
    let cleaned = cleanup().await;

    match (result, cleaned) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_error)) => Err(cleanup_error),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(cleanup_error)) => {
            warn!("Cleanup after '{}' also failed: {}", error, cleanup_error);
            Err(error)
        }
    }
}
