//! Built-in widget catalog registered at startup.

use aura_core::{
    validate, Anchor, DescriptorRenderer, RenderContext, StartPosition, ToolSpec, ValidationError,
    WidgetManifest, WidgetMeta, WidgetRegistry, WidgetRenderer,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn tool(name: &str, description: &str, input_schema: Value) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Adds open/done counts so the front end can badge the dock icon without walking items.
#[derive(Debug)]
struct TasksRenderer;

impl WidgetRenderer for TasksRenderer {
    fn render(&self, ctx: &RenderContext<'_>) -> Value {
        let items = ctx
            .props
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let done = items
            .iter()
            .filter(|i| i.get("done").and_then(Value::as_bool).unwrap_or(false))
            .count();
        json!({
            "widget": "tasks",
            "instanceId": ctx.updater.instance_id(),
            "props": ctx.props,
            "language": ctx.language,
            "open": items.len() - done,
            "done": done,
        })
    }
}

fn notes() -> WidgetManifest {
    WidgetManifest::new(
        "notes",
        WidgetMeta::new("Notes", "📝", "Scratchpad for quick notes").with_size(360.0, 420.0),
    )
    .singleton()
    .with_discovery(&["note", "notes", "memo", "write", "remember", "jot"], Some("productivity"), Some(70))
    .with_state("notes", "notes-{sessionId}")
    .with_instructions("Use append_note to add text the user asks to remember. Keep one notes window.")
    .with_tool(tool(
        "append_note",
        "Append a line of text to the notes",
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
    ))
    .with_tool(tool(
        "clear_notes",
        "Remove all notes",
        json!({"type": "object", "properties": {}}),
    ))
}

fn tasks() -> WidgetManifest {
    WidgetManifest::new(
        "tasks",
        WidgetMeta::new("Tasks", "✅", "Todo list").with_size(380.0, 460.0),
    )
    .with_renderer(Arc::new(TasksRenderer))
    .singleton()
    .with_discovery(&["task", "tasks", "todo", "list", "plan", "checklist"], Some("productivity"), Some(75))
    .with_state("tasks", "tasks-{sessionId}")
    .with_instructions("Add or complete items with the tools. Never open a second task list.")
    .with_tool(tool(
        "add_task",
        "Add a task",
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
    ))
    .with_tool(tool(
        "complete_task",
        "Mark a task done by its index",
        json!({"type": "object", "properties": {"index": {"type": "integer"}}, "required": ["index"]}),
    ))
}

fn image_viewer() -> WidgetManifest {
    WidgetManifest::new(
        "image-viewer",
        WidgetMeta::new("Image", "🖼", "Shows a picture or blob").with_size(520.0, 400.0),
    )
    .with_discovery(&["image", "picture", "photo", "show", "view"], Some("media"), Some(60))
    .with_instructions("Pass the image URL as props.src. blob:// URLs are served by the blob store.")
}

fn weather() -> Result<WidgetManifest, ValidationError> {
    let manifest = json!({
        "id": "weather",
        "meta": {
            "title": "Weather",
            "icon": "🌦",
            "description": "Current conditions and a short forecast",
            "defaultWidth": 340,
            "defaultHeight": 260
        },
        "discovery": {
            "keywords": ["weather", "forecast", "rain", "temperature", "umbrella", "sun"],
            "category": "info",
            "priority": 70
        },
        "instructions": "Set props.city. Several weather windows may be open for different cities."
    });
    WidgetManifest::from_json(manifest, Arc::new(DescriptorRenderer::new("weather")))
        .map_err(|e| ValidationError::new("weather".to_string(), vec![e.to_string()]))
}

fn news() -> WidgetManifest {
    WidgetManifest::new(
        "news",
        WidgetMeta::new("News", "📰", "Headlines for a topic").with_size(460.0, 520.0),
    )
    .with_discovery(&["news", "headlines", "today", "latest"], Some("info"), Some(90))
    .with_instructions("Set props.topic when the user names one.")
}

fn timer() -> WidgetManifest {
    WidgetManifest::new(
        "timer",
        WidgetMeta::new("Timer", "⏱", "Countdown timer")
            .with_size(280.0, 200.0)
            .with_start(StartPosition::Anchor(Anchor::Center)),
    )
    .with_discovery(&["timer", "countdown", "minutes", "alarm", "remind"], Some("productivity"), Some(55))
    .with_instructions("Set props.seconds to the requested duration.")
    .with_tool(tool(
        "start_timer",
        "Start or restart the countdown",
        json!({"type": "object", "properties": {"seconds": {"type": "integer"}}, "required": ["seconds"]}),
    ))
}

/// Registry holding every built-in widget. Validator warnings are logged, not fatal.
pub fn builtin_registry() -> Result<WidgetRegistry, ValidationError> {
    let registry = WidgetRegistry::new();
    for manifest in [notes(), tasks(), image_viewer(), weather()?, news(), timer()] {
        let report = validate(&manifest);
        for warning in &report.warnings {
            tracing::warn!(widget = %manifest.id, warning = %warning, "manifest warning");
        }
        registry.register(manifest)?;
    }
    tracing::info!(widgets = registry.len(), "widget catalog registered");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_core::{SelectOptions, SelectionEngine, WindowController};

    #[test]
    fn test_catalog_is_complete_and_clean() {
        let registry = builtin_registry().unwrap();
        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, vec!["image-viewer", "news", "notes", "tasks", "timer", "weather"]);
        for manifest in registry.get_all() {
            let report = validate(&manifest);
            assert!(report.valid, "{}", manifest.id);
            assert!(report.warnings.is_empty(), "{}: {:?}", manifest.id, report.warnings);
        }
        assert!(registry.get("notes").unwrap().singleton);
        assert!(registry.get("tasks").unwrap().singleton);
        assert!(!registry.get("weather").unwrap().singleton);
    }

    #[test]
    fn test_weather_query_prefers_weather() {
        let engine = SelectionEngine::new(Arc::new(builtin_registry().unwrap()));
        let picks = engine.select("will it rain tomorrow", SelectOptions::default());
        assert_eq!(picks[0].id, "weather");
    }

    #[test]
    fn test_tasks_renderer_counts_items() {
        let controller = Arc::new(WindowController::new(Arc::new(builtin_registry().unwrap())));
        let id = controller
            .spawn(
                "tasks",
                json!({"items": [{"text": "a", "done": true}, {"text": "b"}, {"text": "c"}]}),
            )
            .id()
            .unwrap()
            .to_string();
        let view = controller.render(&id).unwrap();
        assert_eq!(view["open"], 2);
        assert_eq!(view["done"], 1);
        assert_eq!(view["instanceId"], id.as_str());
    }
}
