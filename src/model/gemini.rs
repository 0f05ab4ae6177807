use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GenerationError, Secret};

pub const DEFAULT_MODEL: &str = "gemini-pro";
pub const MODELS: &[&str] = &[DEFAULT_MODEL];

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub model_id: String,
    pub api_key: Option<Secret>,
}

impl GeminiConfig {
    pub fn new(api_key: Option<Secret>) -> Self {
        Self {
            model_id: DEFAULT_MODEL.to_string(),
            api_key,
        }
    }

    fn usable_key(&self) -> Option<&Secret> {
        self.api_key.as_ref().filter(|key| !key.is_blank())
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    // The text of the first candidate, as the SDK's `.text` accessor reports it
    fn into_text(self) -> Result<String, GenerationError> {
        let candidate = self.candidates.into_iter().next().ok_or_else(|| {
            GenerationError::Remote("Gemini returned no candidates".to_string())
        })?;
        let finish_reason = candidate.finish_reason;
        let texts: Vec<String> = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.text)
            .collect();

        if texts.is_empty() {
            return Err(GenerationError::Remote(format!(
                "Gemini returned no text (finish reason: {})",
                finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(texts.concat())
    }
}

// Client for the Generative Language API
pub struct GeminiAdapter {
    client: Client,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Only the new message is sent; earlier turns are not part of the request.
    pub async fn generate(
        &self,
        user_message: &str,
        config: &GeminiConfig,
    ) -> Result<String, GenerationError> {
        let key = config.usable_key().ok_or_else(|| {
            GenerationError::Config("Please enter a Gemini API key".to_string())
        })?;
        if config.model_id.trim().is_empty() {
            return Err(GenerationError::Config("No Gemini model selected".to_string()));
        }

        info!("Requesting Gemini generation from {}", config.model_id);
        debug!("Prompt: {}", user_message);

        let url = format!("{}/models/{}:generateContent", self.base_url, config.model_id);
        let payload = GenerateRequest {
            contents: [Content {
                parts: [Part { text: user_message }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", key.expose())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Remote(format!(
                "Gemini API error (status {}): {}",
                status.as_u16(),
                body
            )));
        }

        let reply = response.json::<GenerateResponse>().await?.into_text()?;
        info!("Response length: {} characters", reply.chars().count());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::mock_provider;
    use serde_json::json;

    fn reply_with(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        })
    }

    #[actix_web::test]
    async fn missing_key_is_config_error_without_a_call() {
        let (url, captured) = mock_provider(200, reply_with("unused")).await;
        let adapter = GeminiAdapter::new(Client::new(), url);

        for key in [None, Some(Secret::new("")), Some(Secret::new("   "))] {
            let err = adapter
                .generate("hello", &GeminiConfig::new(key))
                .await
                .unwrap_err();
            assert!(matches!(err, GenerationError::Config(_)));
        }
        assert!(captured.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn sends_only_the_new_message() {
        let (url, captured) = mock_provider(200, reply_with("  Four.\n")).await;
        let adapter = GeminiAdapter::new(Client::new(), url);

        let reply = adapter
            .generate("What is 2+2?", &GeminiConfig::new(Some(Secret::new("key"))))
            .await
            .unwrap();
        assert_eq!(reply, "  Four.\n");

        let requests = captured.lock().unwrap();
        let (path, body) = &requests[0];
        assert_eq!(path, "/models/gemini-pro:generateContent");
        assert_eq!(
            body,
            &json!({ "contents": [{ "parts": [{ "text": "What is 2+2?" }] }] })
        );
    }

    #[actix_web::test]
    async fn api_error_is_remote_error() {
        let (url, _) =
            mock_provider(400, json!({ "error": { "message": "API key not valid" } })).await;
        let adapter = GeminiAdapter::new(Client::new(), url);

        let err = adapter
            .generate("hi", &GeminiConfig::new(Some(Secret::new("bad"))))
            .await
            .unwrap_err();
        match err {
            GenerationError::Remote(message) => assert!(message.contains("API key not valid")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn blocked_reply_has_no_text() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        }))
        .unwrap();
        let err = response.into_text().unwrap_err();
        assert_eq!(
            err,
            GenerationError::Remote("Gemini returned no text (finish reason: SAFETY)".to_string())
        );
    }

    #[test]
    fn parts_are_joined() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "a" }, { "text": "b" }] } }]
        }))
        .unwrap();
        assert_eq!(response.into_text().unwrap(), "ab");
    }
}
