use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::config::CompletionConfig;
use crate::retry::{Failure, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_payload: &str,
        options: CompletionOptions,
    ) -> anyhow::Result<String>;
}

pub fn chat_completions_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/chat/completions")
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(config: &CompletionConfig, retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: chat_completions_endpoint(&config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            retry,
        })
    }

    async fn post_once(&self, body: &serde_json::Value) -> Result<String, Failure> {
        let endpoint = self.endpoint.as_str();
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| Failure::transport(err, format!("POST {endpoint}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| Failure::transport(err, "read completion response body".to_owned()))?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            let err = anyhow::anyhow!("completion API error ({status}): {message}");
            return Err(if Failure::is_transient_status(status) {
                Failure::Transient(err)
            } else {
                Failure::Permanent(err)
            });
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .context("parse completion response")
            .map_err(Failure::Permanent)?;
        extract_message_text(&value)
            .context("extract message text")
            .map_err(Failure::Permanent)
    }
}

#[async_trait]
impl Completion for ChatClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_payload: &str,
        options: CompletionOptions,
    ) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_payload },
            ],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });

        let body = &body;
        self.retry
            .run("completion", move || self.post_once(body))
            .await
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_message_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let choices = value
        .get("choices")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `choices` array in response"))?;

    let text = choices
        .first()
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(|content| content.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing `choices[0].message.content`"))?
        .trim()
        .to_owned();

    if text.is_empty() {
        anyhow::bail!("completion output text is empty");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        assert_eq!(
            chat_completions_endpoint("https://api.example/v1/"),
            "https://api.example/v1/chat/completions"
        );
    }

    #[test]
    fn extract_message_text_reads_first_choice() -> anyhow::Result<()> {
        let value = serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "  Hero  " } },
                { "message": { "role": "assistant", "content": "ignored" } }
            ]
        });
        assert_eq!(extract_message_text(&value)?, "Hero");
        Ok(())
    }

    #[test]
    fn extract_message_text_rejects_empty_output() {
        let value = serde_json::json!({ "choices": [ { "message": { "content": "   " } } ] });
        assert!(extract_message_text(&value).is_err());
        assert!(extract_message_text(&serde_json::json!({})).is_err());
    }

    #[test]
    fn parse_error_message_reads_nested_message() {
        let raw = r#"{"error":{"message":"invalid api key","type":"auth"}}"#;
        assert_eq!(parse_error_message(raw).as_deref(), Some("invalid api key"));
        assert_eq!(parse_error_message("not json"), None);
    }
}
