//! Widget state lookup for grounding the reflection prompt.

use crate::persistence::PersistenceGateway;
use crate::registry::WidgetManifest;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, error};

/// Placeholder in a state document template.
pub const SESSION_PLACEHOLDER: &str = "{sessionId}";

/// Longest rendering of a single widget's raw state in the context block.
const MAX_STATE_CHARS: usize = 600;

pub fn resolve_document(template: &str, session_id: &str) -> String {
    template.replace(SESSION_PLACEHOLDER, session_id)
}

/// Persisted state of one widget, as fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetContext {
    pub widget_type: String,
    pub title: String,
    pub summary_fields: Option<Vec<String>>,
    pub state: serde_json::Value,
}

/// Fetches the saved state of every manifest that declares a state schema.
///
/// Lookups run concurrently. A failed or empty lookup is logged and left out; it never
/// affects the others.
pub async fn fetch_context(
    store: &dyn PersistenceGateway,
    manifests: &[Arc<WidgetManifest>],
    session_id: &str,
) -> Vec<WidgetContext> {
    let lookups = manifests.iter().filter_map(|manifest| {
        let schema = manifest.state.as_ref()?;
        let document = resolve_document(&schema.document, session_id);
        let manifest = manifest.clone();
        Some(async move {
            let schema = manifest.state.as_ref()?;
            match store.get(&schema.collection, &document).await {
                Ok(Some(state)) => Some(WidgetContext {
                    widget_type: manifest.id.clone(),
                    title: manifest.meta.title.clone(),
                    summary_fields: schema.summary_fields.clone(),
                    state,
                }),
                Ok(None) => {
                    debug!(widget_type = %manifest.id, document = %document, "no saved widget state");
                    None
                }
                Err(e) => {
                    error!(widget_type = %manifest.id, document = %document, error = %e, "widget state fetch failed");
                    None
                }
            }
        })
    });
    join_all(lookups).await.into_iter().flatten().collect()
}

/// Renders fetched state as a short text block for the prompt.
pub fn format_context(entries: &[WidgetContext]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!("[{}] {}\n", entry.widget_type, entry.title));
        match &entry.summary_fields {
            Some(fields) if !fields.is_empty() => {
                for field in fields {
                    if let Some(value) = entry.state.get(field) {
                        out.push_str(&format!("  {field}: {}\n", short(value)));
                    }
                }
            }
            _ => {
                out.push_str("  ");
                out.push_str(&short(&entry.state));
                out.push('\n');
            }
        }
    }
    out
}

fn short(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => format!("{} items {}", items.len(), value),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_STATE_CHARS {
        let cut: String = text.chars().take(MAX_STATE_CHARS).collect();
        format!("{cut}…")
    } else {
        text
    }
}
