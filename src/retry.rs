//! 試行ごとのタイムアウト付きリトライ
//!
//! 試行はすべてポリシーのタイムアウトで包み、リトライ回数も有限なので
//! `retry` は必ず有限時間で終わる。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::config::RetryPolicy;

/// これより長い Retry-After は切り詰める
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    RateLimited { retry_after: Option<Duration> },
    Transient,
}

pub trait Retryable {
    /// None: リトライしても無駄
    fn retry_class(&self) -> Option<RetryClass>;

    /// タイムアウトした試行のエラー値
    fn timed_out(after: Duration) -> Self;
}

fn delay_for(policy: &RetryPolicy, retry: u32, class: RetryClass) -> Duration {
    let scheduled = policy.backoff(retry);
    match class {
        RetryClass::RateLimited { retry_after: Some(hint) } => scheduled.max(hint.min(MAX_RETRY_AFTER)),
        _ => scheduled,
    }
}

/// `op` には試行番号 (0 = 初回) が渡る
pub async fn retry<T, E, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let timeout = policy.attempt_timeout();
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(timeout)),
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let class = match err.retry_class() {
            Some(class) if attempt < policy.max_retries => class,
            _ => return Err(err),
        };

        let delay = delay_for(policy, attempt, class);
        let kind = match class {
            RetryClass::RateLimited { .. } => "rate limited",
            RetryClass::Transient => "failed",
        };
        warn!(
            "[{}] {} ({}), retry {}/{} in {:.0}s",
            label,
            kind,
            err,
            attempt + 1,
            policy.max_retries,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
