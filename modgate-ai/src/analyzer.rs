//! Chat-completions analyzer adapter.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint, submits a
//! whole batch as one user message carrying a JSON array, and parses the
//! compact or full verdict shapes out of the model's reply.

use std::time::Duration;

use async_trait::async_trait;
use modgate_common::error::{Error, Result};
use modgate_common::models::{Message, Verdict};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a content safety classifier for an anonymous messenger. Return strict JSON only.
Use code:
1 clean
2 non-critical abuse
3 human review
4 suspicious competitor bypass
5 commercial/off-platform
6 dangerous/illegal

Domain rules:
- Intimate/sexual conversation between users is allowed by default.
- Critical priority: detect sales/commercial intent, including intimate services/content sold for money.
- Escalate commercial behavior when messages contain calls to move to other platforms specifically to continue selling, payment, booking, or deal execution.
- Neutral contact exchange is allowed when there is no sales intent.
- Base classification on intent and context, not platform names alone.

Trigger tokens can be single words or short phrases, each max 255 characters.
Return compact format: {"a":status_code,"b":"reason","c":confidence,"d":["trigger_tokens"],"e":violator_user_id,"f":message_id}.
For batch input, return array of objects."#;

/// Adapter configuration. Empty strings and a zero timeout fall back to the
/// defaults; only the API key is mandatory.
#[derive(Debug, Clone, Default)]
pub struct ChatAnalyzerOptions {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub system_prompt: String,
}

/// AI analyzer speaking the OpenAI chat-completions wire format.
pub struct ChatAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

/// Derives the chat-completions endpoint from a configured base URL.
fn chat_completions_url(base: &str) -> String {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return format!("{DEFAULT_BASE_URL}/chat/completions");
    }
    match reqwest::Url::parse(trimmed) {
        Ok(mut url) => {
            let path = url.path().trim_end_matches('/').to_string();
            let path = match path.as_str() {
                "" => "/chat/completions".to_string(),
                "/v1" => "/v1/chat/completions".to_string(),
                p if p.ends_with("/chat/completions") => p.to_string(),
                p => format!("{p}/chat/completions"),
            };
            url.set_path(&path);
            url.to_string()
        }
        Err(_) => format!("{trimmed}/chat/completions"),
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Pulls the assistant text out of a completion body and strips markdown
/// code fences the model sometimes wraps around JSON.
fn extract_content(body: &str) -> Result<String> {
    let response: ChatCompletionResponse = serde_json::from_str(body)?;
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(Error::Analyzer("choices is empty".into()));
    };
    let mut content = choice.message.content.trim();
    if content.is_empty() {
        return Err(Error::Analyzer("response content is empty".into()));
    }
    content = content
        .strip_prefix("```json")
        .or_else(|| content.strip_prefix("```"))
        .unwrap_or(content);
    content = content.strip_suffix("```").unwrap_or(content);
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::Analyzer("response content is empty".into()));
    }
    Ok(content.to_string())
}

/// Parses either one verdict object or an array of them.
fn parse_verdicts(content: &str) -> Result<Vec<Verdict>> {
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::Analyzer("empty result payload".into()));
    }
    if content.starts_with('[') {
        let verdicts: Vec<Verdict> = serde_json::from_str(content)?;
        return Ok(verdicts);
    }
    let verdict: Verdict = serde_json::from_str(content)?;
    Ok(vec![verdict])
}

/// Orders verdicts to match the submitted messages: by message id where the
/// model echoed ids, positionally otherwise. Zero ids are defaulted from
/// the matching message.
fn align_verdicts(messages: &[Message], verdicts: Vec<Verdict>) -> Vec<Verdict> {
    if verdicts.is_empty() {
        return Vec::new();
    }

    let mut by_id: std::collections::HashMap<i64, Verdict> =
        std::collections::HashMap::with_capacity(verdicts.len());
    for verdict in &verdicts {
        if verdict.message_id != 0 {
            by_id.insert(verdict.message_id, verdict.clone());
        }
    }

    if !by_id.is_empty() {
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            let Some(mut verdict) = by_id.get(&message.id).cloned() else {
                continue;
            };
            if verdict.violator_user_id == 0 {
                verdict.violator_user_id = message.user;
            }
            out.push(verdict);
        }
        if !out.is_empty() {
            return out;
        }
    }

    let mut out = Vec::with_capacity(messages.len());
    for (message, mut verdict) in messages.iter().zip(verdicts) {
        if verdict.violator_user_id == 0 {
            verdict.violator_user_id = message.user;
        }
        if verdict.message_id == 0 {
            verdict.message_id = message.id;
        }
        out.push(verdict);
    }
    out
}

impl ChatAnalyzer {
    pub fn new(options: ChatAnalyzerOptions) -> Result<Self> {
        if options.api_key.trim().is_empty() {
            return Err(Error::Config("AI API key is required".into()));
        }
        let timeout = if options.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            options.timeout
        };
        let model = if options.model.trim().is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            options.model
        };
        let system_prompt = if options.system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            options.system_prompt
        };
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: chat_completions_url(&options.base_url),
            api_key: options.api_key,
            model,
            system_prompt,
        })
    }
}

#[async_trait]
impl modgate_common::traits::AiAnalyzer for ChatAnalyzer {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn analyze(&self, message: &Message) -> Result<Verdict> {
        let results = self.analyze_batch(std::slice::from_ref(message)).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| Error::Analyzer("empty response".into()))
    }

    async fn analyze_batch(&self, messages: &[Message]) -> Result<Vec<Verdict>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let input: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({"id": m.id, "user": m.user, "data": m.data}))
            .collect();
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": serde_json::to_string(&input)?},
            ],
            "temperature": 0,
            "stream": false,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if status.as_u16() >= 300 {
            return Err(Error::Analyzer(format!("status {}: {body}", status.as_u16())));
        }
        debug!(status = status.as_u16(), "chat completion received");

        let content = extract_content(&body)?;
        let mut verdicts = parse_verdicts(&content)?;

        // Some models collapse a batch into one object; fan it back out.
        if verdicts.len() == 1 && messages.len() > 1 {
            let template = verdicts.remove(0);
            for message in messages {
                let mut verdict = template.clone();
                verdict.message_id = message.id;
                if verdict.violator_user_id == 0 {
                    verdict.violator_user_id = message.user;
                }
                verdicts.push(verdict);
            }
        }

        Ok(align_verdicts(messages, verdicts))
    }
}
