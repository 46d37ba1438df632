//! HTTP text generator for Anthropic- and OpenAI-compatible APIs.
//!
//! Anthropic: `POST {base_url}/v1/messages` with `x-api-key` and
//! `anthropic-version` headers. OpenAI-compatible: `POST {base_url}/chat/completions`
//! with a bearer token. Failures map onto [`GenerationCallError`]:
//! 429 is `RateLimited` (honouring `retry-after`), client timeouts are
//! `Timeout`, everything else is `InvalidResponse`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use super::{PromptContext, TextGenerator};
use crate::config::ProviderSettings;
use crate::error::{DraftError, GenerationCallError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adapter {
    Anthropic,
    OpenAi,
}

impl Adapter {
    fn parse(name: &str) -> Result<Self, DraftError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "openai-compatible" | "deepseek" => Ok(Self::OpenAi),
            other => Err(DraftError::Config(format!(
                "Unknown provider adapter: '{}' (expected 'anthropic' or 'openai')",
                other
            ))),
        }
    }
}

pub struct HttpTextGenerator {
    client: reqwest::Client,
    adapter: Adapter,
    settings: ProviderSettings,
    name: String,
}

impl HttpTextGenerator {
    /// `settings` must already have `${VAR}` references resolved.
    pub fn new(settings: ProviderSettings, call_timeout: Duration) -> Result<Self, DraftError> {
        let adapter = Adapter::parse(&settings.adapter)?;
        if settings.base_url.trim().is_empty() {
            return Err(DraftError::Config("provider.base_url is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| DraftError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let name = format!("{}:{}", settings.adapter, settings.model);
        Ok(Self {
            client,
            adapter,
            settings,
            name,
        })
    }

    fn anthropic_request(&self, ctx: &PromptContext) -> (String, serde_json::Value) {
        let url = format!("{}/v1/messages", self.settings.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "messages": [{ "role": "user", "content": ctx.user }],
        });
        if !ctx.system.is_empty() {
            body["system"] = serde_json::Value::String(ctx.system.clone());
        }
        if let Some(temp) = self.settings.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        (url, body)
    }

    fn openai_request(&self, ctx: &PromptContext) -> (String, serde_json::Value) {
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let mut messages = Vec::new();
        if !ctx.system.is_empty() {
            messages.push(serde_json::json!({ "role": "system", "content": ctx.system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": ctx.user }));

        let mut body = serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "messages": messages,
        });
        if let Some(temp) = self.settings.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        (url, body)
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, ctx: &PromptContext) -> Result<String, GenerationCallError> {
        let (url, body) = match self.adapter {
            Adapter::Anthropic => self.anthropic_request(ctx),
            Adapter::OpenAi => self.openai_request(ctx),
        };

        tracing::debug!(
            provider = %self.name,
            kind = ctx.kind.as_str(),
            title = %ctx.title,
            "Calling generation API: {}",
            url
        );

        let request = self.client.post(&url).header("content-type", "application/json");
        let request = match self.adapter {
            Adapter::Anthropic => request
                .header("x-api-key", &self.settings.api_key)
                .header("anthropic-version", "2023-06-01"),
            Adapter::OpenAi => {
                request.header("Authorization", format!("Bearer {}", self.settings.api_key))
            }
        };

        let response = request.json(&body).send().await.map_err(map_transport_error)?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status, retry_after, &text));
        }

        let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            GenerationCallError::InvalidResponse(format!("Failed to parse response JSON: {}", e))
        })?;
        let content = match self.adapter {
            Adapter::Anthropic => extract_anthropic_text(&json),
            Adapter::OpenAi => extract_openai_text(&json),
        };

        match content {
            Some(c) if !c.trim().is_empty() => Ok(c),
            _ => Err(GenerationCallError::InvalidResponse(
                "Response contained no text".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn map_transport_error(e: reqwest::Error) -> GenerationCallError {
    if e.is_timeout() {
        GenerationCallError::Timeout
    } else {
        GenerationCallError::InvalidResponse(format!("HTTP request failed: {}", e))
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn classify_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> GenerationCallError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return GenerationCallError::RateLimited {
            retry_after_secs: retry_after,
        };
    }
    let snippet: String = body.chars().take(200).collect();
    GenerationCallError::InvalidResponse(format!("API returned {}: {}", status, snippet))
}

/// Joins every `text` block of an Anthropic Messages response.
fn extract_anthropic_text(json: &serde_json::Value) -> Option<String> {
    json.get("content")?
        .as_array()?
        .iter()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .map(|s| s.to_string())
        .reduce(|a, b| format!("{}\n{}", a, b))
}

fn extract_openai_text(json: &serde_json::Value) -> Option<String> {
    json.get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_adapter_parse() {
        assert_eq!(Adapter::parse("Anthropic").unwrap(), Adapter::Anthropic);
        assert_eq!(Adapter::parse("openai").unwrap(), Adapter::OpenAi);
        assert!(matches!(Adapter::parse("grpc"), Err(DraftError::Config(_))));
    }

    #[test]
    fn test_rate_limit_maps_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, parse_retry_after(&headers), "");
        assert_eq!(
            err,
            GenerationCallError::RateLimited {
                retry_after_secs: Some(12)
            }
        );
    }

    #[test]
    fn test_server_error_is_invalid_response() {
        let err = classify_status(StatusCode::BAD_GATEWAY, None, "upstream down");
        match err {
            GenerationCallError::InvalidResponse(msg) => assert!(msg.contains("upstream down")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extract_anthropic_text_joins_blocks() {
        let json = serde_json::json!({
            "content": [
                { "type": "text", "text": "first" },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "second" }
            ]
        });
        assert_eq!(extract_anthropic_text(&json).as_deref(), Some("first\nsecond"));
        assert_eq!(extract_anthropic_text(&serde_json::json!({})), None);
    }

    #[test]
    fn test_extract_openai_text() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }]
        });
        assert_eq!(extract_openai_text(&json).as_deref(), Some("hello"));
        assert_eq!(extract_openai_text(&serde_json::json!({ "choices": [] })), None);
    }

    #[test]
    fn test_new_rejects_empty_base_url() {
        let settings = ProviderSettings {
            base_url: "  ".to_string(),
            ..ProviderSettings::default()
        };
        assert!(HttpTextGenerator::new(settings, Duration::from_secs(5)).is_err());
    }
}
