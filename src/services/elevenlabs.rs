use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::info;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;

use super::{classify_status, ServiceError, SpeechSynthesizer};
use crate::config::ElevenLabsConfig;

/// ElevenLabs text-to-speech
pub struct ElevenLabsClient {
    client: Client,
    url: String,
    api_key: String,
    model_id: String,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

impl ElevenLabsClient {
    pub fn new(config: &ElevenLabsConfig, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!(
                "{}/text-to-speech/{}",
                config.endpoint.trim_end_matches('/'),
                config.voice_id
            ),
            api_key: api_key.to_string(),
            model_id: config.model_id.clone(),
            voice_settings: VoiceSettings {
                stability: config.stability,
                similarity_boost: config.similarity_boost,
            },
        })
    }

    fn request_body<'a>(&'a self, text: &'a str) -> SpeechRequest<'a> {
        SpeechRequest {
            text,
            model_id: &self.model_id,
            voice_settings: self.voice_settings,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ServiceError> {
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&self.url)
            .header("xi-api-key", &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "audio/mpeg")
            .json(&self.request_body(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, body));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(ServiceError::InvalidResponse("empty audio".to_string()));
        }
        info!(
            "[elevenlabs] audio {} bytes in {:.1}s",
            audio.len(),
            start.elapsed().as_secs_f32()
        );
        Ok(audio)
    }
}
