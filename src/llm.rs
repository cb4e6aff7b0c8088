use std::time::Duration;

use base64::Engine;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use crate::error::{MnemosyneError, Result};

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct Message {
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize, Clone)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// Strip a wrapping ``` code fence some models add around plain-text
/// answers.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return text.to_string();
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() < 3 {
        return text.to_string();
    }
    let close_idx = lines.iter().rposition(|l| l.trim() == "```");
    if let Some(idx) = close_idx {
        if idx > 0 {
            return lines[1..idx].join("\n").trim().to_string();
        }
    }
    text.to_string()
}

/// Thin OpenAI-compatible chat completions client. One client per model role
/// (vision-extract, OCR-compress, summary, chat) so each caller can be
/// pointed at a different model/provider via `spec.md` §6 config.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl LlmClient {
    pub fn new(api_key: &str, model: &str, endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    fn request(&self, json: &impl Serialize) -> reqwest::RequestBuilder {
        let mut req = self.client.post(&self.endpoint).json(json);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        req
    }

    /// Stage 1 of the OCR pipeline and any other vision-bearing call: a
    /// single user turn with an optional list of images attached as
    /// base64 data URLs.
    pub async fn complete_multimodal(&self, prompt: &str, images: &[Vec<u8>]) -> Result<String> {
        let mut content = vec![ContentPart::Text {
            text: prompt.to_string(),
        }];
        for img in images {
            let b64 = base64::engine::general_purpose::STANDARD.encode(img);
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/jpeg;base64,{}", b64),
                },
            });
        }
        self.complete(vec![Message {
            role: "user".to_string(),
            content,
        }])
        .await
    }

    /// Stage 2 of the OCR pipeline, the summarizer, and the insight batch
    /// analyzer: plain-text prompt in, plain-text answer out.
    pub async fn complete_text(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.complete(vec![
            Message::text("system", system_prompt),
            Message::text("user", user_prompt),
        ])
        .await
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: 2048,
            stream: false,
        };
        let response = self
            .request(&request)
            .send()
            .await
            .map_err(|e| MnemosyneError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MnemosyneError::LlmProtocol(format!("HTTP {status}: {text}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| MnemosyneError::LlmProtocol(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(MnemosyneError::LlmProtocol(err.message));
        }

        let text = body
            .choices
            .and_then(|c| c.into_iter().next())
            .map(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(MnemosyneError::LlmProtocol("empty response".into()));
        }
        Ok(strip_code_fence(&text))
    }

    /// Query engine invocation: stream content deltas to `on_chunk` as they
    /// arrive, returning the accumulated text. A `finish_reason` of
    /// `"length"` appends and streams a trailing `[Response truncated]`
    /// marker, per `spec.md` §4.6.
    pub async fn stream_chat<F>(&self, messages: Vec<Message>, mut on_chunk: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: 2048,
            stream: true,
        };
        let mut source = EventSource::new(self.request(&request))
            .map_err(|e| MnemosyneError::LlmProtocol(e.to_string()))?;

        let mut full = String::new();
        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.data == "[DONE]" {
                        break;
                    }
                    let chunk: StreamChunk = match serde_json::from_str(&message.data) {
                        Ok(c) => c,
                        Err(_) => continue,
                    };
                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            on_chunk(&content);
                            full.push_str(&content);
                        }
                    }
                    if choice.finish_reason.as_deref() == Some("length") {
                        let marker = "\n[Response truncated]";
                        on_chunk(marker);
                        full.push_str(marker);
                        break;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    source.close();
                    return Err(MnemosyneError::LlmProtocol(e.to_string()));
                }
            }
        }
        source.close();
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_code_block() {
        let text = "```\nhello world\n```";
        assert_eq!(strip_code_fence(text), "hello world");
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        let text = "hello world";
        assert_eq!(strip_code_fence(text), "hello world");
    }
}
