use std::fmt::Write;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::{GenerationError, Secret};
use crate::chat::conversation::Message;

pub const SYSTEM_PREAMBLE: &str = "You are a helpful assistant.";
const REPETITION_PENALTY: u32 = 1;

pub const TEMPERATURE_RANGE: (f32, f32) = (0.01, 1.0);
pub const TOP_P_RANGE: (f32, f32) = (0.01, 1.0);
pub const MAX_LENGTH_RANGE: (u32, u32) = (20, 80);

pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_MAX_LENGTH: u32 = 50;

pub struct LlamaModel {
    pub name: &'static str,
    pub id: &'static str,
}

pub const MODELS: &[LlamaModel] = &[
    LlamaModel {
        name: "Llama2-7B",
        id: "a16z-infra/llama7b-v2-chat:4f0a4744c7295c024a1de15e1a63c880d3da035fa1f49bfd344fe076074c8eea",
    },
    LlamaModel {
        name: "Llama2-13B",
        id: "a16z-infra/llama13b-v2-chat:df7690f1994d94e96ad9d568eac121aecf50684a0b0963b25a41cc40061269e5",
    },
];

pub fn model_id_for(name: &str) -> Option<&'static str> {
    MODELS.iter().find(|m| m.name == name).map(|m| m.id)
}

/// Replicate tokens look like `r8_` followed by 37 more characters.
pub fn is_valid_token(token: &str) -> bool {
    token.starts_with("r8_") && token.chars().count() == 40
}

#[derive(Debug, Clone)]
pub struct LlamaConfig {
    pub model_id: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_length: u32,
    pub api_token: Secret,
}

impl LlamaConfig {
    pub fn new(api_token: Secret) -> Self {
        Self {
            model_id: MODELS[0].id.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_length: DEFAULT_MAX_LENGTH,
            api_token,
        }
    }

    /// Checks everything except the credential.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.model_id.trim().is_empty() {
            return Err(GenerationError::Config("No LLaMA model selected".to_string()));
        }
        if !in_range(self.temperature, TEMPERATURE_RANGE) {
            return Err(GenerationError::Config(format!(
                "Temperature {} is outside {}..={}",
                self.temperature, TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1
            )));
        }
        if !in_range(self.top_p, TOP_P_RANGE) {
            return Err(GenerationError::Config(format!(
                "Top P {} is outside {}..={}",
                self.top_p, TOP_P_RANGE.0, TOP_P_RANGE.1
            )));
        }
        if !(MAX_LENGTH_RANGE.0..=MAX_LENGTH_RANGE.1).contains(&self.max_length) {
            return Err(GenerationError::Config(format!(
                "Max length {} is outside {}..={}",
                self.max_length, MAX_LENGTH_RANGE.0, MAX_LENGTH_RANGE.1
            )));
        }
        Ok(())
    }
}

fn in_range(value: f32, (low, high): (f32, f32)) -> bool {
    value >= low && value <= high
}

/// Flatten the conversation into a single completion prompt.
pub fn render_prompt(history: &[Message], user_message: &str) -> String {
    let mut dialogue = format!("{}\n", SYSTEM_PREAMBLE);
    for message in history {
        let _ = writeln!(dialogue, "{}: {}", message.role.label(), message.content);
    }
    let _ = write!(dialogue, "User: {}\nAssistant:", user_message);
    dialogue
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
}

#[derive(Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    temperature: f32,
    top_p: f32,
    max_length: u32,
    repetition_penalty: u32,
}

#[derive(Deserialize)]
struct Prediction {
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }
}

// Client for the Replicate predictions API
pub struct LlamaAdapter {
    client: Client,
    base_url: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl LlamaAdapter {
    pub fn new(
        client: Client,
        base_url: String,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            poll_interval,
        }
    }

    pub async fn generate(
        &self,
        history: &[Message],
        user_message: &str,
        config: &LlamaConfig,
    ) -> Result<String, GenerationError> {
        let token = config.api_token.expose();
        if !is_valid_token(token) {
            return Err(GenerationError::Auth(
                "Please enter a valid Replicate API token".to_string(),
            ));
        }
        config.validate()?;

        let prompt = render_prompt(history, user_message);
        let version = config
            .model_id
            .split_once(':')
            .map(|(_, version)| version)
            .unwrap_or(&config.model_id);

        info!(
            "Requesting LLaMA completion from {} (temperature: {}, top_p: {}, max_length: {})",
            config.model_id, config.temperature, config.top_p, config.max_length
        );
        debug!("Prompt: {}", prompt);

        let payload = PredictionRequest {
            version,
            input: PredictionInput {
                prompt: &prompt,
                temperature: config.temperature,
                top_p: config.top_p,
                max_length: config.max_length,
                repetition_penalty: REPETITION_PENALTY,
            },
        };

        let url = format!("{}/predictions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Prefer", "wait")
            .json(&payload)
            .send()
            .await?;
        let mut prediction = read_prediction(response).await?;

        // The gateway may answer before the prediction finishes; wait on its status URL.
        let deadline = Instant::now() + self.timeout;
        while !prediction.is_terminal() {
            let poll_url = prediction
                .urls
                .as_ref()
                .and_then(|urls| urls.get.clone())
                .ok_or_else(|| {
                    GenerationError::Remote(format!(
                        "Prediction is {} but has no status URL",
                        prediction.status
                    ))
                })?;
            if Instant::now() >= deadline {
                warn!("Prediction still {} after {:?}", prediction.status, self.timeout);
                return Err(GenerationError::Remote(format!(
                    "Prediction did not finish within {}s",
                    self.timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
            let response = self.client.get(&poll_url).bearer_auth(token).send().await?;
            prediction = read_prediction(response).await?;
        }

        if prediction.status != "succeeded" {
            let reason = match prediction.error {
                Some(Value::String(message)) => message,
                Some(other) if !other.is_null() => other.to_string(),
                _ => "no reason given".to_string(),
            };
            return Err(GenerationError::Remote(format!(
                "Prediction {}: {}",
                prediction.status, reason
            )));
        }

        let reply = join_output(prediction.output)?;
        info!("Response length: {} characters", reply.chars().count());
        Ok(reply)
    }
}

async fn read_prediction(response: reqwest::Response) -> Result<Prediction, GenerationError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::Remote(format!(
            "Replicate request failed (status {}): {}",
            status.as_u16(),
            body
        )));
    }
    Ok(response.json().await?)
}

// Fragments are joined with no separator
fn join_output(output: Option<Value>) -> Result<String, GenerationError> {
    match output {
        Some(Value::Array(fragments)) => fragments
            .into_iter()
            .map(|fragment| match fragment {
                Value::String(text) => Ok(text),
                other => Err(GenerationError::Remote(format!(
                    "Unexpected output fragment: {}",
                    other
                ))),
            })
            .collect(),
        Some(Value::String(text)) => Ok(text),
        Some(Value::Null) | None => Err(GenerationError::Remote(
            "Prediction returned no output".to_string(),
        )),
        Some(other) => Err(GenerationError::Remote(format!(
            "Unexpected output shape: {}",
            other
        ))),
    }
}
