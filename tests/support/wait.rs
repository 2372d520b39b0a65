use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};

/// Polls `f` until it yields a value, backing off from 10ms up to 250ms.
pub async fn wait_for<T, F, Fut>(description: &str, timeout: Duration, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    let mut sleep_for = Duration::from_millis(10);

    loop {
        if let Some(value) = f().await.with_context(|| format!("poll {description}"))? {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timeout waiting for {description}");
        }

        tokio::time::sleep(sleep_for).await;
        sleep_for = (sleep_for * 2).min(Duration::from_millis(250));
    }
}
