//! OpenAI-compatible chat client, used for the local RAG / web search server.

use super::{drain_sse_data, ChatMessage, ChatRequest, ChatResponse, LlmError, StreamChunk};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    /// Keyless config for the local server's `/v1` API.
    pub fn local(server_url: &str) -> Self {
        Self {
            api_key: String::new(),
            base_url: format!("{}/v1", server_url.trim_end_matches('/')),
        }
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamResponse {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

async fn post(config: &OpenAiConfig, request: &ChatRequest, stream: bool) -> Result<Response, LlmError> {
    let body = OpenAiRequest {
        model: &request.model,
        messages: &request.messages,
        stream,
    };

    let mut req = Client::new()
        .post(format!("{}/chat/completions", config.base_url))
        .header("Content-Type", "application/json")
        .json(&body);

    if !config.api_key.is_empty() {
        req = req.header("Authorization", format!("Bearer {}", config.api_key));
    }

    let resp = req.send().await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }
    Ok(resp)
}

pub async fn chat(config: &OpenAiConfig, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
    let resp = post(config, request, false).await?;
    let data: OpenAiResponse = resp.json().await?;
    let content = data
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        model: request.model.clone(),
    })
}

pub async fn chat_stream(
    config: &OpenAiConfig,
    request: &ChatRequest,
    on_chunk: impl Fn(StreamChunk) + Send,
) -> Result<String, LlmError> {
    let resp = post(config, request, true).await?;

    let mut full_content = String::new();
    let mut stream = resp.bytes_stream();
    let mut buffer = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);

        for data in drain_sse_data(&mut buffer) {
            if data == "[DONE]" {
                on_chunk(StreamChunk {
                    delta: String::new(),
                    done: true,
                });
                return Ok(full_content);
            }

            let parsed = match serde_json::from_str::<OpenAiStreamResponse>(&data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable stream event");
                    continue;
                }
            };
            if let Some(choice) = parsed.choices.first() {
                if let Some(content) = &choice.delta.content {
                    full_content.push_str(content);
                    on_chunk(StreamChunk {
                        delta: content.clone(),
                        done: false,
                    });
                }
                if choice.finish_reason.is_some() {
                    on_chunk(StreamChunk {
                        delta: String::new(),
                        done: true,
                    });
                    return Ok(full_content);
                }
            }
        }
    }

    on_chunk(StreamChunk {
        delta: String::new(),
        done: true,
    });
    Ok(full_content)
}
