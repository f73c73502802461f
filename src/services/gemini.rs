use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{classify_status, SceneAnalyzer, ServiceError};
use crate::config::GeminiConfig;

/// Gemini generateContent によるシーン解析
pub struct GeminiClient {
    client: Client,
    url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Image { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!(
                "{}/models/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_key: api_key.to_string(),
        })
    }
}

fn request_body<'a>(jpeg: &[u8], prompt: &'a str) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![Content {
            parts: vec![
                Part::Text { text: prompt },
                Part::Image {
                    inline_data: InlineData {
                        mime_type: "image/jpeg",
                        data: BASE64.encode(jpeg),
                    },
                },
            ],
        }],
    }
}

/// 最初の候補のテキストパートを連結する
fn extract_text(response: GenerateResponse) -> Result<String, ServiceError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(ServiceError::InvalidResponse("no text in response".to_string()));
    }
    Ok(text.to_string())
}

#[async_trait]
impl SceneAnalyzer for GeminiClient {
    async fn analyze(&self, jpeg: &[u8], prompt: &str) -> Result<String, ServiceError> {
        debug!("[gemini] POST {} ({} byte image)", self.url, jpeg.len());
        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(jpeg, prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        let text = extract_text(parsed)?;
        info!("[gemini] response ({} chars)", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(request_body(&[1, 2, 3], "help")).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "help");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(parts[1]["inline_data"]["data"], "AQID");
    }

    #[test]
    fn test_url_from_config() {
        let config = GeminiConfig {
            endpoint: "https://example.test/v1beta/".into(),
            ..GeminiConfig::default()
        };
        let client = GeminiClient::new(&config, "k").unwrap();
        assert_eq!(client.url, "https://example.test/v1beta/models/gemini-2.5-flash:generateContent");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Call 911. "},{"text":"Start CPR."}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Call 911. Start CPR.");
    }

    #[test]
    fn test_extract_text_rejects_empty() {
        let response: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(extract_text(response), Err(ServiceError::InvalidResponse(_))));

        let blocked: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(matches!(extract_text(blocked), Err(ServiceError::InvalidResponse(_))));
    }
}
