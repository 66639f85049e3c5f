//! Reflection step: asks an LLM what the workspace should do about a user message.
//!
//! The reply is a JSON list drawn from a fixed vocabulary (`spawn_air`, `message`,
//! `tool_call`). Execution of those actions belongs to the session; this module only
//! builds the request and parses the reply.

use crate::config::UserConfig;
use crate::error::ReflectionError;
use crate::selection::ScoredWidget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-70b-instruct";

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }
}

/// Inline widget reference carried by an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Instance id threaded through to the window if the attachment is popped out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "widget_type", alias = "type")]
    pub widget_type: String,
    #[serde(default)]
    pub props: serde_json::Value,
}

/// One action in a reflection reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReflectAction {
    /// Open (or update) a widget.
    SpawnAir {
        #[serde(rename = "widgetType", alias = "widget_type", alias = "widget")]
        widget_type: String,
        #[serde(default)]
        props: serde_json::Value,
        #[serde(rename = "instanceId", alias = "instance_id", default, skip_serializing_if = "Option::is_none")]
        instance_id: Option<String>,
    },
    /// Assistant text, optionally with an attachment.
    Message {
        #[serde(alias = "text")]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
    },
    /// Invoke a named tool on a widget.
    ToolCall {
        #[serde(alias = "widgetType", alias = "widget_type")]
        widget: String,
        #[serde(alias = "name")]
        tool: String,
        #[serde(default, alias = "arguments", alias = "input")]
        args: serde_json::Value,
    },
}

/// A prior chat turn given to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Everything the model sees for one turn.
#[derive(Debug, Clone, Default)]
pub struct ReflectionRequest {
    pub message: String,
    pub history: Vec<HistoryTurn>,
    pub candidates: Vec<ScoredWidget>,
    /// Pre-formatted widget state block.
    pub context: String,
    pub language: String,
}

#[async_trait]
pub trait ReflectionClient: Send + Sync {
    async fn reflect(&self, request: &ReflectionRequest) -> Result<Vec<ReflectAction>, ReflectionError>;
}

// OpenAI-compatible request/response
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: String,
}

/// Reflection over an OpenRouter (OpenAI-compatible) chat completions endpoint.
pub struct OpenRouterReflector {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenRouterReflector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterReflector")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenRouterReflector {
    /// Builds a client from the user config (and its env fallbacks). `None` without an API key.
    pub fn from_user_config(config: &UserConfig) -> Option<Self> {
        let key = config.get_api_key()?;
        let mut reflector = Self::new(key);
        if let Some(model) = config.get_llm_model() {
            reflector = reflector.with_model(&model);
        }
        if let Some(url) = config.get_llm_api_url() {
            reflector = reflector.with_base_url(&url);
        }
        Some(reflector)
    }

    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.trim().to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: OPENROUTER_API_BASE.to_string(),
            client,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ReflectionClient for OpenRouterReflector {
    async fn reflect(&self, request: &ReflectionRequest) -> Result<Vec<ReflectAction>, ReflectionError> {
        if self.api_key.is_empty() {
            return Err(ReflectionError::NotConfigured);
        }

        let mut messages = vec![ChatMessage {
            role: "system",
            content: system_prompt(request),
        }];
        messages.extend(request.history.iter().map(|turn| ChatMessage {
            role: turn.role.as_str(),
            content: turn.content.clone(),
        }));
        messages.push(ChatMessage {
            role: "user",
            content: request.message.clone(),
        });

        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: Some(0.3),
            max_tokens: Some(1024),
        };

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("X-Title", "Aura-Workspace")
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ReflectionError::Api { status, body });
        }

        let parsed: ChatResponse = res.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        debug!(model = %self.model, chars = text.len(), "reflection reply received");
        parse_actions(&text)
    }
}

/// Prompt listing the offered widgets and their current state.
pub fn system_prompt(request: &ReflectionRequest) -> String {
    let mut prompt = String::from(
        "You orchestrate a desktop-like workspace of widget windows. \
         Reply ONLY with a JSON array of actions. Allowed actions:\n\
         {\"type\":\"spawn_air\",\"widgetType\":\"<id>\",\"props\":{}}\n\
         {\"type\":\"message\",\"content\":\"<text>\",\"attachment\":{\"widgetType\":\"<id>\",\"props\":{}}}\n\
         {\"type\":\"tool_call\",\"widget\":\"<id>\",\"tool\":\"<name>\",\"args\":{}}\n",
    );
    if !request.language.is_empty() {
        prompt.push_str(&format!("Answer in language '{}'.\n", request.language));
    }
    if request.candidates.is_empty() {
        prompt.push_str("\nNo widgets are suggested for this message; reply with a message action.\n");
    } else {
        prompt.push_str("\nAvailable widgets:\n");
        for candidate in &request.candidates {
            let m = &candidate.manifest;
            prompt.push_str(&format!("- {}: {} ({})\n", m.id, m.meta.title, m.meta.description));
            if let Some(instructions) = &m.instructions {
                prompt.push_str(&format!("  instructions: {instructions}\n"));
            }
            for tool in &m.tools {
                prompt.push_str(&format!("  tool {}: {} input={}\n", tool.name, tool.description, tool.input_schema));
            }
        }
    }
    if !request.context.is_empty() {
        prompt.push_str("\nCurrent widget state:\n");
        prompt.push_str(&request.context);
        prompt.push('\n');
    }
    prompt
}

/// Extracts an action list from a model reply.
///
/// Accepts a bare array, an `{"actions": [...]}` object, a single action object, or any of
/// those inside a fenced code block. A reply with no JSON at all becomes one `message`.
/// Individual actions that don't fit the vocabulary are dropped with a warning.
pub fn parse_actions(text: &str) -> Result<Vec<ReflectAction>, ReflectionError> {
    let trimmed = strip_fence(text.trim());
    if trimmed.is_empty() {
        return Err(ReflectionError::Parse("empty reply".to_string()));
    }

    let value = match json_slice(trimmed) {
        Some(slice) => serde_json::from_str::<serde_json::Value>(slice)
            .map_err(|e| ReflectionError::Parse(e.to_string()))?,
        None => {
            return Ok(vec![ReflectAction::Message {
                content: trimmed.to_string(),
                attachment: None,
            }])
        }
    };

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("actions") {
            Some(serde_json::Value::Array(items)) => items,
            Some(_) => return Err(ReflectionError::Parse("\"actions\" is not an array".to_string())),
            None => vec![serde_json::Value::Object(obj)],
        },
        other => return Err(ReflectionError::Parse(format!("unexpected reply: {other}"))),
    };

    let actions: Vec<ReflectAction> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<ReflectAction>(item) {
            Ok(action) => Some(action),
            Err(e) => {
                warn!(error = %e, "dropping unrecognised reflection action");
                None
            }
        })
        .collect();

    if actions.is_empty() {
        return Err(ReflectionError::Parse("no recognised actions".to_string()));
    }
    Ok(actions)
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Outermost JSON array or object in `text`, by first opener and last matching closer.
fn json_slice(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let closer = if text[start..].starts_with('[') { ']' } else { '}' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_array() {
        let actions = parse_actions(
            r#"[{"type":"spawn_air","widgetType":"weather","props":{"city":"Oslo"}},
                {"type":"message","content":"Here you go"}]"#,
        )
        .unwrap();
        assert_eq!(
            actions[0],
            ReflectAction::SpawnAir {
                widget_type: "weather".into(),
                props: json!({"city": "Oslo"}),
                instance_id: None,
            }
        );
        assert!(matches!(&actions[1], ReflectAction::Message { content, attachment: None } if content == "Here you go"));
    }

    #[test]
    fn parses_fenced_object_wrapper() {
        let text = "```json\n{\"actions\": [{\"type\": \"tool_call\", \"widget\": \"tasks\", \"tool\": \"add_task\", \"args\": {\"title\": \"milk\"}}]}\n```";
        let actions = parse_actions(text).unwrap();
        assert_eq!(
            actions,
            vec![ReflectAction::ToolCall {
                widget: "tasks".into(),
                tool: "add_task".into(),
                args: json!({"title": "milk"}),
            }]
        );
    }

    #[test]
    fn prose_becomes_message_and_junk_is_rejected() {
        let actions = parse_actions("Sure, happy to help!").unwrap();
        assert!(matches!(&actions[0], ReflectAction::Message { content, .. } if content == "Sure, happy to help!"));

        assert!(parse_actions("").is_err());
        assert!(parse_actions("[{\"type\": \"dance\"}]").is_err());
        assert!(parse_actions("[1, 2]x]").is_err());
        assert!(parse_actions("[1, 2]").is_err());
    }

    #[test]
    fn unknown_actions_are_dropped_not_fatal() {
        let actions = parse_actions(
            r#"Reply: [{"type":"dance"},{"type":"message","text":"hi","attachment":{"type":"notes","props":{}}}]"#,
        )
        .unwrap();
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ReflectAction::Message { attachment: Some(a), .. } => {
                assert_eq!(a.widget_type, "notes");
                assert!(a.id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn prompt_lists_candidates_and_context() {
        use crate::registry::{WidgetManifest, WidgetMeta};
        use std::sync::Arc;
        let manifest = Arc::new(
            WidgetManifest::new("notes", WidgetMeta::new("Notes", "📝", "Quick notes"))
                .with_instructions("Use for short text"),
        );
        let request = ReflectionRequest {
            message: "note this".into(),
            candidates: vec![ScoredWidget {
                id: "notes".into(),
                score: 50,
                active: false,
                manifest,
            }],
            context: "notes: 2 items".into(),
            language: "de".into(),
            ..Default::default()
        };
        let prompt = system_prompt(&request);
        assert!(prompt.contains("- notes: Notes (Quick notes)"));
        assert!(prompt.contains("instructions: Use for short text"));
        assert!(prompt.contains("notes: 2 items"));
        assert!(prompt.contains("'de'"));
    }
}
