use super::{drain_sse_data, ChatRequest, ChatResponse, LlmError, StreamChunk};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Serialize, Deserialize, Default)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
    finish_reason: Option<String>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }

    fn finished(&self) -> bool {
        self.candidates
            .first()
            .is_some_and(|c| c.finish_reason.is_some())
    }
}

fn build_request(request: &ChatRequest) -> GeminiRequest {
    let system_text: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect();

    let contents = request
        .messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| GeminiContent {
            // Gemini calls the assistant "model"
            role: Some(if m.role == "assistant" { "model" } else { "user" }.to_string()),
            parts: vec![GeminiPart {
                text: m.content.clone(),
            }],
        })
        .collect();

    GeminiRequest {
        contents,
        system_instruction: (!system_text.is_empty()).then(|| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: system_text.join("\n\n"),
            }],
        }),
    }
}

async fn post(config: &GeminiConfig, request: &ChatRequest, stream: bool) -> Result<Response, LlmError> {
    let url = if stream {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            config.base_url, request.model
        )
    } else {
        format!(
            "{}/v1beta/models/{}:generateContent",
            config.base_url, request.model
        )
    };

    let resp = Client::new()
        .post(url)
        .header("Content-Type", "application/json")
        .header("x-goog-api-key", &config.api_key)
        .json(&build_request(request))
        .send()
        .await?;

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

pub async fn chat(config: &GeminiConfig, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
    let resp = post(config, request, false).await?;
    let data: GeminiResponse = resp.json().await?;
    Ok(ChatResponse {
        content: data.text(),
        model: request.model.clone(),
    })
}

pub async fn chat_stream(
    config: &GeminiConfig,
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
            let event = match serde_json::from_str::<GeminiResponse>(&data) {
                Ok(event) => event,
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable Gemini event");
                    continue;
                }
            };
            let text = event.text();
            if !text.is_empty() {
                full_content.push_str(&text);
                on_chunk(StreamChunk {
                    delta: text,
                    done: false,
                });
            }
            if event.finished() {
                on_chunk(StreamChunk {
                    delta: String::new(),
                    done: true,
                });
                return Ok(full_content);
            }
        }
    }

    on_chunk(StreamChunk {
        delta: String::new(),
        done: true,
    });
    Ok(full_content)
}
