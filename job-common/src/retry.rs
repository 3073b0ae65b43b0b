use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF: Duration = Duration::from_millis(100);

/// Retries a transient operation up to [`MAX_ATTEMPTS`] times with a fixed
/// backoff, classifying which errors are worth retrying via `is_transient`.
/// The first non-transient error, or the last transient one, is returned.
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    is_transient: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && is_transient(&err) => {
                tokio::time::sleep(BACKOFF).await;
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}
