//! Generation provider implementations.
//!
//! Concrete backends for the [`GenerationProvider`] trait defined in
//! `docqa-core`:
//! - **[`OllamaGenerator`]**: `POST /api/generate`; streams newline-delimited JSON.
//! - **[`OpenAIGenerator`]**: `POST /v1/chat/completions`; streams Server-Sent Events.
//!
//! Both parse the response body incrementally with `reqwest`'s byte stream,
//! splitting on newlines and handing each complete line to a per-protocol
//! parser. Non-streaming requests yield the whole answer as one fragment.

use anyhow::{bail, Result};
use async_trait::async_trait;
use docqa_core::error::RagError;
use docqa_core::generation::{
    single_fragment, FragmentStream, GenerationProvider, GenerationRequest,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::GenerationConfig;

/// What one line of a streamed response means.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamLine {
    Fragment(String),
    Done,
    Skip,
}

type LineParser = fn(&str) -> std::result::Result<StreamLine, String>;

fn generation_error(model: &str, message: impl Into<String>) -> RagError {
    RagError::Generation {
        model: model.to_string(),
        message: message.into(),
    }
}

/// Turn a streaming HTTP response into answer fragments.
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network chunks decode correctly.
fn line_stream(response: reqwest::Response, model: String, parse: LineParser) -> FragmentStream {
    Box::pin(async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(generation_error(&model, format!("stream interrupted: {}", e)));
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse(line.trim()) {
                    Ok(StreamLine::Fragment(text)) => yield Ok(text),
                    Ok(StreamLine::Done) => return,
                    Ok(StreamLine::Skip) => {}
                    Err(message) => {
                        yield Err(generation_error(&model, message));
                        return;
                    }
                }
            }
        }

        let rest = String::from_utf8_lossy(&buffer);
        match parse(rest.trim()) {
            Ok(StreamLine::Fragment(text)) => yield Ok(text),
            Ok(_) => {}
            Err(message) => yield Err(generation_error(&model, message)),
        }
    })
}

/// Map a non-success HTTP status to a generation error.
async fn check_status(
    response: reqwest::Response,
    model: &str,
    service: &str,
) -> docqa_core::error::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_text = response.text().await.unwrap_or_default();
    Err(generation_error(
        model,
        format!("{} API error {}: {}", service, status, body_text),
    ))
}

fn build_client(config: &GenerationConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

// ============ Ollama ============

/// Generation provider using a local Ollama instance.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    stream: bool,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.base_url().to_string(),
            default_model: config.model.clone(),
            stream: config.stream,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn supports_streaming(&self, _model: &str) -> bool {
        self.stream
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> docqa_core::error::Result<FragmentStream> {
        let body = serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": request.stream,
        });
        debug!(model = %request.model, stream = request.stream, "ollama generate");

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                generation_error(
                    &request.model,
                    format!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.base_url, e
                    ),
                )
            })?;
        let response = check_status(response, &request.model, "Ollama").await?;

        if request.stream {
            return Ok(line_stream(response, request.model, parse_ollama_line));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| generation_error(&request.model, e.to_string()))?;
        if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
            return Err(generation_error(&request.model, err));
        }
        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| generation_error(&request.model, "missing response field"))?;
        Ok(single_fragment(text.to_string()))
    }
}

/// One NDJSON line of `/api/generate` output.
fn parse_ollama_line(line: &str) -> std::result::Result<StreamLine, String> {
    if line.is_empty() {
        return Ok(StreamLine::Skip);
    }
    let json: serde_json::Value =
        serde_json::from_str(line).map_err(|e| format!("invalid stream line: {}", e))?;
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Err(err.to_string());
    }
    let text = json
        .get("response")
        .and_then(|r| r.as_str())
        .unwrap_or_default();
    if json.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
        if text.is_empty() {
            return Ok(StreamLine::Done);
        }
        // Final line may still carry text; the stream ends after it.
        return Ok(StreamLine::Fragment(text.to_string()));
    }
    if text.is_empty() {
        Ok(StreamLine::Skip)
    } else {
        Ok(StreamLine::Fragment(text.to_string()))
    }
}

// ============ OpenAI ============

/// Generation provider using the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    stream: bool,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Ok(Self {
            client: build_client(config)?,
            base_url: config.base_url().to_string(),
            api_key,
            default_model: config.model.clone(),
            stream: config.stream,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIGenerator {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn supports_streaming(&self, _model: &str) -> bool {
        self.stream
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> docqa_core::error::Result<FragmentStream> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": request.stream,
        });
        debug!(model = %request.model, stream = request.stream, "openai chat completion");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| generation_error(&request.model, format!("OpenAI request failed: {}", e)))?;
        let response = check_status(response, &request.model, "OpenAI").await?;

        if request.stream {
            return Ok(line_stream(response, request.model, parse_openai_sse_line));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| generation_error(&request.model, e.to_string()))?;
        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| generation_error(&request.model, "missing choices[0].message.content"))?;
        Ok(single_fragment(text.to_string()))
    }
}

/// One SSE line of a streamed chat completion.
fn parse_openai_sse_line(line: &str) -> std::result::Result<StreamLine, String> {
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, `event:` and comment lines.
        return Ok(StreamLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }
    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| format!("invalid SSE data: {}", e))?;
    if let Some(err) = json.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(err.to_string());
    }
    match json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => Ok(StreamLine::Fragment(text.to_string())),
        _ => Ok(StreamLine::Skip),
    }
}

/// Create the configured [`GenerationProvider`].
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
