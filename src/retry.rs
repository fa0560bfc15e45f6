use std::future::Future;
use std::time::Duration;

#[derive(Debug)]
pub enum Failure {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

impl Failure {
    /// 429 and 5xx are worth another attempt; other statuses are not.
    pub fn is_transient_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    pub fn transport(err: reqwest::Error, what: String) -> Self {
        Self::Transient(anyhow::Error::new(err).context(what))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed`-th failed attempt (1-based).
    pub fn backoff(&self, failed: u32) -> Duration {
        let factor = 2_u32.saturating_pow(failed.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let attempts = self.attempts.max(1);
        let mut failed = 0_u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(Failure::Permanent(err)) => return Err(err),
                Err(Failure::Transient(err)) => {
                    failed += 1;
                    if failed >= attempts {
                        return Err(err.context(format!("{what}: gave up after {attempts} attempt(s)")));
                    }
                    let delay = self.backoff(failed);
                    tracing::warn!(
                        what,
                        attempt = failed,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{err:#}"),
                        "transient failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
