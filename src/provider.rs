//! Client for the chat-completion provider that drafts assistant answers.
//!
//! - Blocking `ureq` POST to the OpenAI-compatible completions endpoint.
//! - Bearer auth; the key comes from configuration and never appears in
//!   errors or logs.
//! - One attempt with a fixed timeout; a slow provider fails the call and
//!   the caller decides whether a fallback answer is possible.

use crate::models::chat::ChatTurn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const COMPLETIONS_PATH: &str = "/v1/chat/completions";
/// Upper bound for a completion round-trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(25);
/// Fixed sampling temperature. Low enough to stay grounded in the supplied
/// context without parroting it verbatim.
const COMPLETION_TEMPERATURE: f64 = 0.4;

#[derive(Debug)]
pub enum ProviderError {
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
}

impl core::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProviderError::Transport(s) => write!(f, "provider transport error: {}", s),
            ProviderError::Http { status, message } => {
                write!(f, "provider http {}: {}", status, message)
            }
            ProviderError::Json(s) => write!(f, "provider response error: {}", s),
        }
    }
}

impl std::error::Error for ProviderError {}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f64,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

pub struct CompletionClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    model: String,
}

impl CompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        CompletionClient { agent, base_url, api_key: api_key.into(), model: model.into() }
    }

    /// Send one conversation to the provider and return the first choice's
    /// answer text.
    pub fn complete(&self, messages: &[ChatTurn]) -> Result<String, ProviderError> {
        let url = format!("{}{}", self.base_url, COMPLETIONS_PATH);
        let request =
            CompletionRequest { model: &self.model, messages, temperature: COMPLETION_TEMPERATURE };

        let resp = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Accept", "application/json")
            .send_json(&request);

        match resp {
            Ok(res) => {
                let body =
                    res.into_string().map_err(|e| ProviderError::Transport(e.to_string()))?;
                parse_completion(&body)
            }
            Err(ureq::Error::Status(status, res)) => {
                let body = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Err(ProviderError::Http { status, message: body })
            }
            Err(ureq::Error::Transport(t)) => Err(ProviderError::Transport(t.to_string())),
        }
    }
}

/// Decode the provider body, reporting the JSON path on shape mismatches so
/// a provider-side format drift is diagnosable from the error alone.
fn parse_completion(body: &str) -> Result<String, ProviderError> {
    let mut de = serde_json::Deserializer::from_str(body);
    let decoded: CompletionResponse =
        serde_path_to_error::deserialize(&mut de).map_err(|e| ProviderError::Json(e.to_string()))?;
    decoded
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| ProviderError::Json(String::from("response carried no choices")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_has_fixed_temperature_and_roles() {
        let messages = vec![ChatTurn::system("ctx"), ChatTurn::user("hello")];
        let request = CompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: COMPLETION_TEMPERATURE,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["temperature"], 0.4);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hello");
    }

    #[test]
    fn first_choice_content_is_extracted() {
        let body = r#"{"choices":[{"message":{"content":"all good"}},{"message":{"content":"ignored"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "all good");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = parse_completion(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Json(_)));
    }

    #[test]
    fn shape_mismatch_reports_the_json_path() {
        let err = parse_completion(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("choices"), "got: {}", text);
    }
}
