use std::env;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

const API_BASE: &str = "https://openrouter.ai/api/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are a highly efficient, concise, and direct terminal-based AI assistant for cybersecurity and ethical hacking, acting as a professional penetration tester.

Your operating environment: {os_info}

Your primary function is to:
1. Generate and provide executable shell commands (Bash) in Markdown code blocks (```bash ... ```) ONLY WHEN THE USER EXPLICITLY ASKS YOU TO PERFORM AN ACTION.
2. Respond conversationally if the user is having a general conversation or asking a question not requiring immediate command execution.

IMPORTANT GUIDELINES:
* When a target is set, ALWAYS use the shell variable $TARGET in commands.
* If a command requires root privileges, clearly state "This command requires root privileges (sudo)."
* If no target is set, prompt the user to set one using 'set target <IP|URL>'.
* Guide through recon, enumeration, exploitation (if authorized), post-exploitation.
* For multi-step tasks, provide the first set of commands and wait for user feedback.
* If a new script or file is required, provide the commands to create that file first (e.g., using cat << 'EOF' > filename.py) before attempting to execute or use the file.
* Do not propose reconnaissance or scanning commands unless the user explicitly requests a scan or enumeration.
* Do not simulate terminal output.
* Explain commands briefly outside the code block if explanations are enabled."#;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("OPENROUTER_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("all models failed to respond: {0}")]
    AllModelsFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_api_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Conversation history, seeded with the system prompt.
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        let os_info = format!("OS: {} ({})", env::consts::OS, env::consts::ARCH);
        let system = Message {
            role: Role::System,
            content: SYSTEM_PROMPT_TEMPLATE.replace("{os_info}", &os_info),
        };
        Self {
            messages: vec![system],
        }
    }

    pub fn add_user(&mut self, content: &str) {
        self.messages.push(Message {
            role: Role::User,
            content: content.to_string(),
        });
    }

    pub fn add_assistant(&mut self, content: &str) {
        self.messages.push(Message {
            role: Role::Assistant,
            content: content.to_string(),
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Non-system history, for display.
    pub fn history(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    pub fn reset(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Text-generation seam: the execution pipeline only ever sees the returned
/// response string.
#[async_trait]
pub trait ChatBackend {
    async fn complete(&mut self, messages: &[Message]) -> Result<String, BackendError>;
    fn current_model(&self) -> &str;
    fn models(&self) -> &[String];
    fn set_model(&mut self, model: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

fn extract_content(body: &str) -> Result<String, String> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| format!("failed to decode response: {}", e))?;
    if let Some(error) = parsed.error {
        return Err(error
            .message
            .unwrap_or_else(|| "unknown API error".to_string()));
    }
    parsed
        .choices
        .and_then(|mut choices| {
            if choices.is_empty() {
                None
            } else {
                Some(choices.remove(0).message.content)
            }
        })
        .ok_or_else(|| "response contained no choices".to_string())
}

/// OpenRouter chat-completions client with an ordered model fallback list.
/// The first model that answers becomes the current model.
pub struct OpenRouterClient {
    api_key: String,
    models: Vec<String>,
    current: String,
    client: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(models: Vec<String>) -> Result<Self, BackendError> {
        let api_key = env::var("OPENROUTER_API_KEY").map_err(|_| BackendError::MissingApiKey)?;
        let current = models.first().cloned().unwrap_or_default();
        Ok(Self {
            api_key,
            models,
            current,
            client: reqwest::Client::new(),
        })
    }

    fn candidate_models(&self) -> Vec<String> {
        let mut ordered = vec![self.current.clone()];
        ordered.extend(self.models.iter().filter(|m| **m != self.current).cloned());
        ordered
    }
}

#[async_trait]
impl ChatBackend for OpenRouterClient {
    async fn complete(&mut self, messages: &[Message]) -> Result<String, BackendError> {
        let payload_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_api_str(),
                    "content": m.content,
                })
            })
            .collect();

        let mut last_error = String::new();
        for model in self.candidate_models() {
            let payload = serde_json::json!({
                "model": model,
                "messages": payload_messages,
                "temperature": 0.7,
                "max_tokens": 2000,
            });

            let response = self
                .client
                .post(API_BASE)
                .bearer_auth(&self.api_key)
                .timeout(REQUEST_TIMEOUT)
                .json(&payload)
                .send()
                .await;

            let body = match response {
                Ok(resp) => match resp.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        last_error = format!("reading response from {}: {}", model, e);
                        log::error!("{}", last_error);
                        continue;
                    }
                },
                Err(e) => {
                    last_error = format!("request error with model {}: {}", model, e);
                    log::error!("{}", last_error);
                    continue;
                }
            };

            match extract_content(&body) {
                Ok(text) => {
                    self.current = model;
                    return Ok(text);
                }
                Err(e) => {
                    last_error = format!("model {}: {}", model, e);
                    log::error!("{}", last_error);
                }
            }
        }

        Err(BackendError::AllModelsFailed(last_error))
    }

    fn current_model(&self) -> &str {
        &self.current
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    fn set_model(&mut self, model: &str) -> bool {
        if self.models.iter().any(|m| m == model) {
            self.current = model.to_string();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_starts_with_system_prompt_only() {
        let conv = Conversation::new();
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.history().count(), 0);
    }

    #[test]
    fn reset_keeps_the_system_prompt() {
        let mut conv = Conversation::new();
        conv.add_user("scan the host");
        conv.add_assistant("on it");
        assert_eq!(conv.history().count(), 2);
        conv.reset();
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
    }

    #[test]
    fn extracts_content_from_completion_body() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "hello");
    }

    #[test]
    fn surfaces_api_errors() {
        let body = r#"{"error":{"message":"rate limited"}}"#;
        assert_eq!(extract_content(body).unwrap_err(), "rate limited");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let body = r#"{"choices":[]}"#;
        assert!(extract_content(body).is_err());
    }
}
