//! 外部サービス（シーン解析・音声合成）のクライアント

pub mod elevenlabs;
pub mod gemini;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

use crate::retry::{RetryClass, Retryable};

pub use elevenlabs::ElevenLabsClient;
pub use gemini::GeminiClient;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl Retryable for ServiceError {
    fn retry_class(&self) -> Option<RetryClass> {
        match self {
            ServiceError::RateLimited { retry_after } => Some(RetryClass::RateLimited { retry_after: *retry_after }),
            ServiceError::Transient(_) | ServiceError::Timeout(_) => Some(RetryClass::Transient),
            ServiceError::Rejected { .. } | ServiceError::InvalidResponse(_) => None,
        }
    }

    fn timed_out(after: Duration) -> Self {
        ServiceError::Timeout(after)
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::InvalidResponse(err.to_string())
        } else {
            // 接続失敗・タイムアウト・途中切断はまとめて一時的扱い
            ServiceError::Transient(err.to_string())
        }
    }
}

/// 画像 + 指示文 → 応急処置の案内文
#[async_trait]
pub trait SceneAnalyzer: Send + Sync {
    async fn analyze(&self, jpeg: &[u8], prompt: &str) -> Result<String, ServiceError>;
}

/// 案内文 → 音声 (MP3)
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ServiceError>;
}

/// 失敗ステータスを分類する
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: String) -> ServiceError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ServiceError::RateLimited {
            retry_after: retry_after(headers),
        };
    }
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return ServiceError::Transient(format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)));
    }
    ServiceError::Rejected {
        status: status.as_u16(),
        body: truncate(&body, 500),
    }
}

/// Retry-After（秒数形式のみ）
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
