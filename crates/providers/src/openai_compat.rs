//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI and any endpoint exposing `/v1/chat/completions` with
//! function calling and image input.
//!
//! Supports:
//! - Chat completions with tool use
//! - Multimodal tool results (inline base64 images)
//! - Verbatim replay of prior assistant messages

use std::time::Duration;

use async_trait::async_trait;
use bimpilot_core::error::ProviderError;
use bimpilot_core::message::{ContentPart, ConversationTurn, ToolPayload};
use bimpilot_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// An OpenAI-compatible reasoning engine.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: build_client(DEFAULT_TIMEOUT),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Set the HTTP timeout for a single completion.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Convert the conversation to OpenAI chat messages.
    ///
    /// Tool invocations are not emitted separately: they already live in the
    /// `tool_calls` of the preceding assistant message.
    fn to_api_messages(system: Option<&str>, turns: &[ConversationTurn]) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(turns.len() + 1);

        if let Some(system) = system {
            messages.push(WireMessage::Api(ApiMessage {
                role: "system".into(),
                content: Some(ApiContent::Text(system.to_string())),
                tool_calls: None,
                tool_call_id: None,
            }));
        }

        for turn in turns {
            match turn {
                ConversationTurn::UserTask { text } => {
                    messages.push(WireMessage::Api(ApiMessage {
                        role: "user".into(),
                        content: Some(ApiContent::Text(text.clone())),
                        tool_calls: None,
                        tool_call_id: None,
                    }));
                }
                ConversationTurn::EngineOutput(output) => {
                    let message = match &output.raw {
                        Some(raw) => WireMessage::Raw(raw.clone()),
                        None => WireMessage::Api(Self::assistant_message(output)),
                    };
                    messages.push(message);
                }
                ConversationTurn::ToolInvocation { .. } => {}
                ConversationTurn::ToolResult {
                    call_id, payload, ..
                } => {
                    messages.push(WireMessage::Api(ApiMessage {
                        role: "tool".into(),
                        content: Some(Self::to_api_content(payload)),
                        tool_calls: None,
                        tool_call_id: Some(call_id.clone()),
                    }));
                }
            }
        }

        messages
    }

    fn assistant_message(output: &EngineOutput) -> ApiMessage {
        ApiMessage {
            role: "assistant".into(),
            content: if output.content.is_empty() && output.has_tool_calls() {
                None
            } else {
                Some(ApiContent::Text(output.content.clone()))
            },
            tool_calls: if output.tool_calls.is_empty() {
                None
            } else {
                Some(
                    output
                        .tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: None,
        }
    }

    fn to_api_content(payload: &ToolPayload) -> ApiContent {
        match payload {
            ToolPayload::Text(text) => ApiContent::Text(text.clone()),
            ToolPayload::Parts(parts) => ApiContent::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => ApiContentPart::Text { text: text.clone() },
                        ContentPart::Image { mime_type, data } => ApiContentPart::ImageUrl {
                            image_url: ApiImageUrl {
                                url: format!("data:{mime_type};base64,{data}"),
                                detail: "auto".into(),
                            },
                        },
                    })
                    .collect(),
            ),
        }
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(request.system.as_deref(), &request.turns),
            "stream": false,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_completion_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
            body["parallel_tool_calls"] = serde_json::json!(request.parallel_tool_calls);
        }

        body
    }

    /// Turn the first choice of a response into an engine output.
    fn parse_response(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let raw = strip_nulls(choice.message);
        let message: ApiResponseMessage =
            serde_json::from_value(raw.clone()).map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse assistant message: {e}"),
            })?;

        let tool_calls: Vec<MessageToolCall> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let output = EngineOutput {
            content: message.content.unwrap_or_default(),
            tool_calls,
            raw: Some(raw),
        };

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            output,
            usage,
            model: api_response.model,
        })
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Drop null-valued keys so the replayed message only carries real fields.
fn strip_nulls(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(strip_nulls).collect())
        }
        other => other,
    }
}

#[async_trait]
impl bimpilot_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{}'",
                self.name
            )));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            return Err(ProviderError::ModelNotFound(request.model));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        Self::parse_response(api_response)
    }
}

// --- OpenAI API types (internal) ---

/// A request message: either built from a turn or replayed as received.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireMessage {
    Api(ApiMessage),
    Raw(serde_json::Value),
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Debug, Serialize)]
struct ApiImageUrl {
    url: String,
    detail: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
