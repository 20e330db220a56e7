use std::time::Duration;

use anyhow::Context as _;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

impl OpenAiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        let base_url = std::env::var("TOPICBATCH_OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let model =
            std::env::var("TOPICBATCH_OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
        Ok(Self {
            base_url,
            api_key,
            model,
            temperature: 0.4,
        })
    }

    pub fn responses_endpoint(&self) -> String {
        let base_url = self.base_url.trim_end_matches('/');
        format!("{base_url}/responses")
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .context("build http client")?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Sends one Responses API request asking for a JSON object and returns the
    /// concatenated output text.
    pub async fn respond_json(&self, instructions: &str, input: &str) -> anyhow::Result<String> {
        let endpoint = self.config.responses_endpoint();
        let mut body = serde_json::json!({
            "model": &self.config.model,
            "instructions": instructions,
            "input": input,
            "text": { "format": { "type": "json_object" } },
            "store": false,
        });

        // GPT-5 models reject sampling params like `temperature`.
        if !self.config.model.starts_with("gpt-5")
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert(
                "temperature".to_owned(),
                serde_json::json!(self.config.temperature),
            );
        }

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = response.status();
        let raw = response.text().await.context("read OpenAI response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("OpenAI API error ({status}): {message}");
        }

        let value: serde_json::Value = serde_json::from_str(&raw).context("parse OpenAI response")?;
        extract_output_text(&value).context("extract output text")
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.pointer("/error/message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_output_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `output` array in response"))?;

    let text = output
        .iter()
        .filter(|item| item.get("type").and_then(|v| v.as_str()) == Some("message"))
        .filter_map(|item| item.get("content").and_then(|v| v.as_array()))
        .flatten()
        .filter(|part| part.get("type").and_then(|v| v.as_str()) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
        .collect::<String>();

    if text.trim().is_empty() {
        anyhow::bail!("OpenAI output text is empty");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_output_text_joins_message_parts() -> anyhow::Result<()> {
        let value = serde_json::json!({
            "output": [
                { "type": "reasoning", "content": [] },
                { "type": "message", "content": [
                    { "type": "output_text", "text": "{\"topics\":" },
                    { "type": "output_text", "text": "[]}" }
                ]}
            ]
        });
        assert_eq!(extract_output_text(&value)?, "{\"topics\":[]}");
        Ok(())
    }

    #[test]
    fn extract_output_text_rejects_empty_output() {
        let value = serde_json::json!({ "output": [] });
        assert!(extract_output_text(&value).is_err());
    }

    #[test]
    fn parse_error_message_reads_nested_message() {
        let raw = r#"{"error":{"message":"bad key","type":"invalid_request_error"}}"#;
        assert_eq!(parse_error_message(raw).as_deref(), Some("bad key"));
        assert_eq!(parse_error_message("not json"), None);
    }

    #[test]
    fn responses_endpoint_trims_trailing_slash() {
        let config = OpenAiConfig {
            base_url: "http://127.0.0.1:9/v1/".to_owned(),
            api_key: "k".to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            temperature: 0.0,
        };
        assert_eq!(config.responses_endpoint(), "http://127.0.0.1:9/v1/responses");
    }
}
