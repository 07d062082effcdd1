// Remote text classifier backed by an OpenAI-compatible chat-completions API
// (OpenRouter by default). Each instance talks to one model.

use crate::core::classifier::{ClassifierResponse, TextClassifier};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const MODERATION_PROMPT: &str = "You are a content moderation classifier. \
Decide whether the user's message violates content policy (insults, threats, \
hate speech, sexual content, spam or scams). Reply with a single JSON object \
and nothing else: {\"is_violation\": true or false, \"reason\": \"short explanation\"}.";

pub struct OpenRouterClassifier {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenRouterClassifier {
    pub fn new(
        api_key: String,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn payload(&self, message: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": MODERATION_PROMPT },
                { "role": "user", "content": message },
            ],
            "temperature": 0.0,
            "max_tokens": 200,
        })
    }

    async fn request(&self, message: &str) -> Result<String, String> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.payload(message))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("OpenRouter API error: {} - {}", status, text));
        }

        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        extract_content(&body)
            .map(str::to_string)
            .ok_or_else(|| "response has no message content".to_string())
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn extract_content(body: &Value) -> Option<&str> {
    body["choices"][0]["message"]["content"].as_str()
}

/// Strip a markdown code fence some models wrap their JSON in.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    match trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
    {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

#[async_trait]
impl TextClassifier for OpenRouterClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, message: &str) -> ClassifierResponse {
        match self.request(message).await {
            Ok(content) => ClassifierResponse::from_content(strip_code_fence(&content)),
            Err(e) => ClassifierResponse::call_failure(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::ClassifierVerdict;

    #[test]
    fn test_extract_content() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"is_violation\": false}" } }]
        });
        assert_eq!(extract_content(&body), Some("{\"is_violation\": false}"));

        assert_eq!(extract_content(&json!({ "choices": [] })), None);
        assert_eq!(extract_content(&json!({ "error": "rate limited" })), None);
    }

    #[test]
    fn test_fenced_json_is_parsed() {
        let content = "```json\n{\"is_violation\": true, \"reason\": \"scam\"}\n```";
        assert_eq!(
            ClassifierResponse::from_content(strip_code_fence(content)),
            ClassifierResponse::Verdict(ClassifierVerdict {
                is_violation: true,
                reason: Some("scam".to_string()),
            })
        );
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }

    #[test]
    fn test_payload_carries_model_and_message() {
        let classifier = OpenRouterClassifier::new(
            "key".to_string(),
            "https://example.test/api/v1/",
            "some/model:free",
            Duration::from_secs(5),
        )
        .unwrap();

        let payload = classifier.payload("hello there");
        assert_eq!(payload["model"], "some/model:free");
        assert_eq!(payload["messages"][1]["content"], "hello there");
        assert_eq!(classifier.base_url, "https://example.test/api/v1");
        assert_eq!(classifier.name(), "some/model:free");
    }
}
