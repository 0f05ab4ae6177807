pub mod gemini;
pub mod llama;

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::conversation::Message;
use crate::config::AppConfig;

pub use gemini::{GeminiAdapter, GeminiConfig};
pub use llama::{LlamaAdapter, LlamaConfig};

/// A credential string. Debug output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// Why a generation attempt did not produce a reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Credential missing or malformed; detected before any remote call.
    #[error("{0}")]
    Auth(String),
    /// Provider not fully configured; detected before any remote call.
    #[error("{0}")]
    Config(String),
    /// The hosted call failed or answered with something unexpected.
    #[error("{0}")]
    Remote(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Remote(format!("request to provider failed: {}", err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "llama")]
    Llama,
    #[serde(rename = "gemini")]
    Gemini,
}

/// The active provider of a session together with its tuning and credential.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Llama(LlamaConfig),
    Gemini(GeminiConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Llama(_) => ProviderKind::Llama,
            ProviderConfig::Gemini(_) => ProviderKind::Gemini,
        }
    }

    pub fn model_id(&self) -> &str {
        match self {
            ProviderConfig::Llama(c) => &c.model_id,
            ProviderConfig::Gemini(c) => &c.model_id,
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn generate(
        &self,
        history: &[Message],
        user_message: &str,
        config: &ProviderConfig,
    ) -> Result<String, GenerationError>;
}

/// Routes each request to the adapter matching the configured provider.
pub struct Providers {
    llama: LlamaAdapter,
    gemini: GeminiAdapter,
}

impl Providers {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            llama: LlamaAdapter::new(
                client.clone(),
                config.replicate_api_url.clone(),
                config.request_timeout,
                config.poll_interval,
            ),
            gemini: GeminiAdapter::new(client, config.gemini_api_url.clone()),
        })
    }
}

#[async_trait]
impl ProviderAdapter for Providers {
    async fn generate(
        &self,
        history: &[Message],
        user_message: &str,
        config: &ProviderConfig,
    ) -> Result<String, GenerationError> {
        match config {
            ProviderConfig::Llama(llama) => {
                self.llama.generate(history, user_message, llama).await
            }
            ProviderConfig::Gemini(gemini) => self.gemini.generate(user_message, gemini).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use actix_web::{web, App, HttpResponse, HttpServer};
    use serde_json::Value;

    /// Requests captured by a mock provider: (path, body).
    pub type Captured = Arc<Mutex<Vec<(String, Value)>>>;

    /// Start a throwaway HTTP server that answers every request with `reply`.
    pub async fn mock_provider(status: u16, reply: Value) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let seen = captured.clone();

        let server = HttpServer::new(move || {
            let seen = seen.clone();
            let reply = reply.clone();
            App::new().default_service(web::to(
                move |req: actix_web::HttpRequest, body: web::Bytes| {
                    let seen = seen.clone();
                    let reply = reply.clone();
                    async move {
                        let parsed = serde_json::from_slice(&body).unwrap_or(Value::Null);
                        seen.lock().unwrap().push((req.path().to_string(), parsed));
                        HttpResponse::build(
                            actix_web::http::StatusCode::from_u16(status).unwrap(),
                        )
                        .json(reply)
                    }
                },
            ))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        (format!("http://{}", addr), captured)
    }
}
