//! Widget registry: the catalog of widget types the workspace can open.
//!
//! Manifests are registered once at startup. Lookups never fail; registration validates the
//! required fields and returns a [`ValidationError`] the caller may treat as fatal or not.
//! Re-registering an id replaces the manifest in place (keeping its catalog position) and
//! logs a warning, which keeps hot-reload workflows working.

use crate::controller::WindowUpdater;
use crate::error::ValidationError;
use crate::layout::Position;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Priority assumed for manifests that declare none.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Fallback window size when a manifest declares none.
pub const DEFAULT_WIDTH: f64 = 400.0;
pub const DEFAULT_HEIGHT: f64 = 300.0;

/// Named start anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Center,
}

/// Preferred start position: `"center"` or an explicit `{x, y}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartPosition {
    Anchor(Anchor),
    At(Position),
}

/// Display metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_position: Option<StartPosition>,
}

impl WidgetMeta {
    pub fn new(title: &str, icon: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            icon: icon.to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.default_width = Some(width);
        self.default_height = Some(height);
        self
    }

    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start_position = Some(start);
        self
    }

    pub fn width(&self) -> f64 {
        self.default_width.filter(|w| *w > 0.0).unwrap_or(DEFAULT_WIDTH)
    }

    pub fn height(&self) -> f64 {
        self.default_height.filter(|h| *h > 0.0).unwrap_or(DEFAULT_HEIGHT)
    }
}

/// Discovery metadata consumed by the selection engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

/// Pointer to externally persisted per-widget state.
///
/// `document` may contain a `{sessionId}` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSchema {
    pub collection: String,
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_fields: Option<Vec<String>>,
}

/// MCP-style tool exposed by a widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Inputs handed to a widget renderer.
pub struct RenderContext<'a> {
    pub instance_id: &'a str,
    pub props: &'a serde_json::Value,
    pub language: &'a str,
    /// Narrow channel back into the controller, bound to this instance only.
    pub updater: &'a WindowUpdater,
}

/// Render factory for one widget type. Output is a JSON view descriptor for the front end.
pub trait WidgetRenderer: Send + Sync + std::fmt::Debug {
    fn render(&self, ctx: &RenderContext<'_>) -> serde_json::Value;
}

/// Renderer that describes the window as `{widget, instanceId, props, language}`.
#[derive(Debug, Clone)]
pub struct DescriptorRenderer {
    widget: String,
}

impl DescriptorRenderer {
    pub fn new(widget: &str) -> Self {
        Self {
            widget: widget.to_string(),
        }
    }
}

impl WidgetRenderer for DescriptorRenderer {
    fn render(&self, ctx: &RenderContext<'_>) -> serde_json::Value {
        serde_json::json!({
            "widget": self.widget,
            "instanceId": ctx.instance_id,
            "props": ctx.props,
            "language": ctx.language,
        })
    }
}

/// Registry entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetManifest {
    #[serde(default)]
    pub id: String,
    #[serde(skip)]
    pub renderer: Option<Arc<dyn WidgetRenderer>>,
    #[serde(default)]
    pub meta: WidgetMeta,
    /// At most one live instance of this type when spawned without an explicit id.
    #[serde(default)]
    pub singleton: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<Discovery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSchema>,
    /// Guidance for an LLM planner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

impl WidgetManifest {
    /// Manifest with a [`DescriptorRenderer`] bound.
    pub fn new(id: &str, meta: WidgetMeta) -> Self {
        Self {
            id: id.to_string(),
            renderer: Some(Arc::new(DescriptorRenderer::new(id))),
            meta,
            ..Default::default()
        }
    }

    /// Parses a declarative JSON manifest and binds `renderer` to it.
    pub fn from_json(
        json: serde_json::Value,
        renderer: Arc<dyn WidgetRenderer>,
    ) -> Result<Self, serde_json::Error> {
        let mut manifest: WidgetManifest = serde_json::from_value(json)?;
        manifest.renderer = Some(renderer);
        Ok(manifest)
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn WidgetRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn with_discovery(mut self, keywords: &[&str], category: Option<&str>, priority: Option<u8>) -> Self {
        self.discovery = Some(Discovery {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            category: category.map(str::to_string),
            priority,
        });
        self
    }

    pub fn with_state(mut self, collection: &str, document: &str) -> Self {
        self.state = Some(StateSchema {
            collection: collection.to_string(),
            document: document.to_string(),
            summary_fields: None,
        });
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = Some(instructions.to_string());
        self
    }

    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn priority(&self) -> u8 {
        self.discovery
            .as_ref()
            .and_then(|d| d.priority)
            .unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn category(&self) -> Option<&str> {
        self.discovery.as_ref().and_then(|d| d.category.as_deref())
    }

    pub fn keywords(&self) -> &[String] {
        self.discovery
            .as_ref()
            .map(|d| d.keywords.as_slice())
            .unwrap_or(&[])
    }

    /// Case-insensitive keyword match against free text.
    ///
    /// A keyword matches when it appears inside the query, or when a query word of three or
    /// more characters appears inside the keyword.
    pub fn matches_query(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return true;
        }
        let words: Vec<&str> = q
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|w| w.len() >= 3)
            .collect();
        self.keywords().iter().any(|kw| {
            let kw = kw.trim().to_lowercase();
            !kw.is_empty() && (q.contains(&kw) || words.iter().any(|w| kw.contains(w)))
        })
    }
}

/// Returns the required fields missing from `manifest` (empty when registrable).
pub fn missing_required_fields(manifest: &WidgetManifest) -> Vec<String> {
    let mut missing = Vec::new();
    if manifest.id.trim().is_empty() {
        missing.push("id".to_string());
    }
    if manifest.renderer.is_none() {
        missing.push("component".to_string());
    }
    if manifest.meta == WidgetMeta::default() {
        missing.push("meta".to_string());
        return missing;
    }
    if manifest.meta.title.trim().is_empty() {
        missing.push("meta.title".to_string());
    }
    if manifest.meta.icon.trim().is_empty() {
        missing.push("meta.icon".to_string());
    }
    if manifest.meta.description.trim().is_empty() {
        missing.push("meta.description".to_string());
    }
    missing
}

#[derive(Default)]
struct Catalog {
    entries: Vec<Arc<WidgetManifest>>,
    index: HashMap<String, usize>,
}

/// Catalog of widget types, iterated in registration order.
#[derive(Default)]
pub struct WidgetRegistry {
    catalog: RwLock<Catalog>,
}

impl std::fmt::Debug for WidgetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetRegistry")
            .field("widgets", &self.ids())
            .finish()
    }
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a manifest. Overwriting an existing id logs a warning.
    pub fn register(&self, manifest: WidgetManifest) -> Result<(), ValidationError> {
        let missing = missing_required_fields(&manifest);
        if !missing.is_empty() {
            return Err(ValidationError::new(manifest.id.clone(), missing));
        }

        let mut catalog = self
            .catalog
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = manifest.id.clone();
        let entry = Arc::new(manifest);
        match catalog.index.get(&id).copied() {
            Some(pos) => {
                warn!(widget_type = %id, "widget re-registered; previous manifest overwritten");
                catalog.entries[pos] = entry;
            }
            None => {
                debug!(widget_type = %id, "widget registered");
                let pos = catalog.entries.len();
                catalog.entries.push(entry);
                catalog.index.insert(id, pos);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<WidgetManifest>> {
        let catalog = self.catalog.read().unwrap_or_else(|p| p.into_inner());
        catalog
            .index
            .get(id)
            .and_then(|pos| catalog.entries.get(*pos))
            .cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<WidgetManifest>> {
        self.catalog
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .entries
            .clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.get_all().iter().map(|m| m.id.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.catalog.read().unwrap_or_else(|p| p.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keyword/category search in registration order.
    pub fn search(
        &self,
        query: &str,
        category: Option<&str>,
        min_priority: Option<u8>,
    ) -> Vec<Arc<WidgetManifest>> {
        self.get_all()
            .into_iter()
            .filter(|m| match category {
                Some(cat) => m
                    .category()
                    .map(|c| c.eq_ignore_ascii_case(cat))
                    .unwrap_or(false),
                None => true,
            })
            .filter(|m| min_priority.map(|min| m.priority() >= min).unwrap_or(true))
            .filter(|m| m.matches_query(query))
            .collect()
    }

    /// Removes every manifest. Intended for teardown between tests.
    pub fn reset(&self) {
        let mut catalog = self
            .catalog
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        catalog.entries.clear();
        catalog.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes() -> WidgetManifest {
        WidgetManifest::new("notes", WidgetMeta::new("Notes", "📝", "Quick notes"))
            .singleton()
            .with_discovery(&["note", "notes", "jot", "memo"], Some("productivity"), Some(70))
    }

    #[test]
    fn register_and_lookup() {
        let reg = WidgetRegistry::new();
        reg.register(notes()).unwrap();
        let m = reg.get("notes").unwrap();
        assert_eq!(m.meta.title, "Notes");
        assert!(m.singleton);
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn missing_required_fields_are_reported() {
        let reg = WidgetRegistry::new();
        let mut bad = WidgetManifest::new("clock", WidgetMeta::new("Clock", "", ""));
        bad.renderer = None;
        let err = reg.register(bad).unwrap_err();
        assert_eq!(err.manifest_id, "clock");
        assert_eq!(err.missing, vec!["component", "meta.icon", "meta.description"]);
        assert!(reg.is_empty());

        let no_meta = WidgetManifest {
            id: "bare".into(),
            renderer: Some(Arc::new(DescriptorRenderer::new("bare"))),
            ..Default::default()
        };
        assert_eq!(reg.register(no_meta).unwrap_err().missing, vec!["meta"]);
    }

    #[test]
    fn reregister_overwrites_in_place() {
        let reg = WidgetRegistry::new();
        reg.register(notes()).unwrap();
        reg.register(WidgetManifest::new("tasks", WidgetMeta::new("Tasks", "✅", "Todo list")))
            .unwrap();
        reg.register(WidgetManifest::new("notes", WidgetMeta::new("Notes v2", "📝", "Quick notes")))
            .unwrap();

        assert_eq!(reg.ids(), vec!["notes", "tasks"]);
        assert_eq!(reg.get("notes").unwrap().meta.title, "Notes v2");
    }

    #[test]
    fn search_filters_by_keyword_category_priority() {
        let reg = WidgetRegistry::new();
        reg.register(notes()).unwrap();
        reg.register(
            WidgetManifest::new("weather", WidgetMeta::new("Weather", "☀", "Forecast"))
                .with_discovery(&["weather", "forecast", "rain"], Some("info"), Some(40)),
        )
        .unwrap();

        let hits = reg.search("Will it RAIN tomorrow?", None, None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "weather");

        assert_eq!(reg.search("", Some("productivity"), None).len(), 1);
        assert_eq!(reg.search("", None, Some(60)).len(), 1);
        assert!(reg.search("weather", Some("productivity"), None).is_empty());
        assert_eq!(reg.search("forec", None, None).len(), 1);
    }

    #[test]
    fn declarative_manifest_parses() {
        let json = serde_json::json!({
            "id": "image-viewer",
            "meta": {
                "title": "Images",
                "icon": "🖼",
                "description": "Shows an image",
                "defaultWidth": 500,
                "startPosition": "center"
            },
            "discovery": { "keywords": ["image", "photo"] }
        });
        let m = WidgetManifest::from_json(json, Arc::new(DescriptorRenderer::new("image-viewer"))).unwrap();
        assert_eq!(m.meta.width(), 500.0);
        assert_eq!(m.meta.height(), DEFAULT_HEIGHT);
        assert_eq!(m.meta.start_position, Some(StartPosition::Anchor(Anchor::Center)));
        assert_eq!(m.priority(), DEFAULT_PRIORITY);

        let at: StartPosition = serde_json::from_value(serde_json::json!({"x": 10, "y": 20})).unwrap();
        assert_eq!(at, StartPosition::At(Position { x: 10.0, y: 20.0 }));
    }

    #[test]
    fn poisoned_catalog_still_serves_lookups() {
        let reg = WidgetRegistry::new();
        reg.register(notes()).unwrap();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = reg.catalog.write().unwrap();
            panic!("writer died");
        }));
        assert!(reg.catalog.is_poisoned());
        assert!(reg.contains("notes"));
        assert_eq!(reg.get_all().len(), 1);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.search("memo", None, None).len(), 1);
    }

    #[test]
    fn reset_clears_catalog() {
        let reg = WidgetRegistry::new();
        reg.register(notes()).unwrap();
        reg.reset();
        assert!(reg.is_empty());
        assert!(reg.get("notes").is_none());
    }
}
