use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{Message, SessionView};
use crate::config::AppConfig;
use crate::model::llama::{self, is_valid_token, model_id_for};
use crate::model::{gemini, GeminiConfig, LlamaConfig, ProviderConfig, Secret};

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub session_id: Uuid,
    pub messages: Vec<Message>,
}

/// Provider choice as submitted from the settings panel. Missing tuning
/// values fall back to the defaults; missing credentials fall back to the
/// configured secrets.
#[derive(Debug, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderSettings {
    Llama {
        model: Option<String>,
        temperature: Option<f32>,
        top_p: Option<f32>,
        max_length: Option<u32>,
        api_token: Option<String>,
    },
    Gemini {
        model: Option<String>,
        api_key: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
}

/// Inline credential feedback, shown next to the settings rather than in the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialNotice {
    pub level: NoticeLevel,
    pub message: String,
}

impl CredentialNotice {
    fn success(message: &str) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.to_string(),
        }
    }

    fn warning(message: &str) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProviderUpdateResponse {
    pub session: SessionView,
    pub credential: CredentialNotice,
}

fn typed(value: Option<String>) -> Option<Secret> {
    value.map(Secret::new).filter(|s| !s.is_blank())
}

impl ProviderSettings {
    /// Build the session's provider configuration. Errors describe invalid
    /// input (unknown model, tuning out of range).
    pub fn resolve(self, config: &AppConfig) -> Result<(ProviderConfig, CredentialNotice), String> {
        match self {
            ProviderSettings::Llama {
                model,
                temperature,
                top_p,
                max_length,
                api_token,
            } => {
                let name = model.unwrap_or_else(|| llama::MODELS[0].name.to_string());
                let model_id =
                    model_id_for(&name).ok_or_else(|| format!("Unknown LLaMA model: {}", name))?;

                // a configured secret wins over a typed token
                let (token, notice) = match (&config.replicate_api_token, typed(api_token)) {
                    (Some(stored), _) => (
                        stored.clone(),
                        CredentialNotice::success("Replicate API key loaded!"),
                    ),
                    (None, Some(token)) if is_valid_token(token.expose()) => {
                        (token, CredentialNotice::success("API key accepted!"))
                    }
                    (None, token) => (
                        token.unwrap_or_else(|| Secret::new("")),
                        CredentialNotice::warning("Please enter a valid Replicate API token!"),
                    ),
                };

                let llama = LlamaConfig {
                    model_id: model_id.to_string(),
                    temperature: temperature.unwrap_or(llama::DEFAULT_TEMPERATURE),
                    top_p: top_p.unwrap_or(llama::DEFAULT_TOP_P),
                    max_length: max_length.unwrap_or(llama::DEFAULT_MAX_LENGTH),
                    api_token: token,
                };
                llama.validate().map_err(|e| e.to_string())?;
                Ok((ProviderConfig::Llama(llama), notice))
            }
            ProviderSettings::Gemini { model, api_key } => {
                let model = model.unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string());
                if !gemini::MODELS.contains(&model.as_str()) {
                    return Err(format!("Unknown Gemini model: {}", model));
                }

                let (key, notice) = match (&config.gemini_api_key, typed(api_key)) {
                    (Some(stored), _) => (
                        Some(stored.clone()),
                        CredentialNotice::success("Gemini API key loaded!"),
                    ),
                    (None, Some(key)) => {
                        (Some(key), CredentialNotice::success("Gemini API key set!"))
                    }
                    (None, None) => (
                        None,
                        CredentialNotice::warning("Please enter a Gemini API key!"),
                    ),
                };

                let gemini = GeminiConfig {
                    model_id: model,
                    api_key: key,
                };
                Ok((ProviderConfig::Gemini(gemini), notice))
            }
        }
    }
}
