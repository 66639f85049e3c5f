//! Window controller: the only owner of the live window collection.
//!
//! Every mutation runs to completion under the state lock, then change listeners and bus
//! notifications fire after the lock is released, so listeners may read the state or call
//! back into the controller. Lookup misses (unknown widget type, unknown instance id) are
//! logged and ignored; no operation fails for the caller.

use crate::bus::{BusMessage, EventBus, Subscription, CONTROLLER, SPAWN, WINDOW_CLOSED};
use crate::layout::{self, LayoutConfig, Position, Rect, Size};
use crate::registry::{Anchor, RenderContext, StartPosition, WidgetManifest, WidgetRegistry};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, error, warn};

/// Floor of the z counter; the first window opened gets `Z_FLOOR + 1`.
pub const Z_FLOOR: u64 = 100;

/// Offset between consecutive spawns so windows don't stack exactly.
pub const STAGGER_STEP: f64 = 30.0;
/// The stagger offset wraps after this many windows.
pub const STAGGER_CYCLE: usize = 8;

/// Top-left used when auto-placement is off and the manifest has no start position.
pub const DEFAULT_ORIGIN: Position = Position::new(60.0, 60.0);

pub const DEFAULT_LANGUAGE: &str = "en";

/// One live widget on the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInstance {
    pub id: String,
    pub widget_type: String,
    #[serde(default = "empty_props")]
    pub props: serde_json::Value,
    pub z_index: u64,
    pub position: Position,
    pub size: Size,
    #[serde(default)]
    pub is_minimized: bool,
    /// Epoch millis of the last props change through re-spawn or update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl WindowInstance {
    pub fn rect(&self) -> Rect {
        Rect::from_parts(self.position, self.size)
    }
}

fn empty_props() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_top_z() -> u64 {
    Z_FLOOR
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Complete serializable snapshot of one workspace session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    pub windows: Vec<WindowInstance>,
    #[serde(default = "default_top_z")]
    pub top_z: u64,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for WorkspaceState {
    fn default() -> Self {
        Self::empty(DEFAULT_LANGUAGE)
    }
}

impl WorkspaceState {
    pub fn empty(language: &str) -> Self {
        Self {
            windows: Vec::new(),
            top_z: Z_FLOOR,
            language: language.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn window(&self, id: &str) -> Option<&WindowInstance> {
        self.windows.iter().find(|w| w.id == id)
    }

    fn window_mut(&mut self, id: &str) -> Option<&mut WindowInstance> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    fn next_z(&mut self) -> u64 {
        self.top_z += 1;
        self.top_z
    }

    /// Replaces non-finite geometry with zero and restores the counter invariants.
    fn sanitize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.windows.retain(|w| seen.insert(w.id.clone()));
        for w in &mut self.windows {
            for v in [&mut w.position.x, &mut w.position.y, &mut w.size.width, &mut w.size.height] {
                if !v.is_finite() {
                    *v = 0.0;
                }
            }
        }
        let max_z = self.windows.iter().map(|w| w.z_index).max().unwrap_or(Z_FLOOR);
        self.top_z = self.top_z.max(max_z).max(Z_FLOOR);
    }
}

/// Partial update for a window. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_minimized: Option<bool>,
}

impl WindowPatch {
    pub fn props(props: serde_json::Value) -> Self {
        Self {
            props: Some(props),
            ..Default::default()
        }
    }

    pub fn position(position: Position) -> Self {
        Self {
            position: Some(position),
            ..Default::default()
        }
    }

    pub fn size(size: Size) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }
}

/// What a spawn call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// A new window was created with this id.
    Created(String),
    /// An existing window was updated and focused instead.
    Reused(String),
    /// The widget type is unknown; nothing changed.
    Ignored,
}

impl SpawnOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            SpawnOutcome::Created(id) | SpawnOutcome::Reused(id) => Some(id),
            SpawnOutcome::Ignored => None,
        }
    }
}

/// Shallow merge: keys in `patch` overwrite, other keys in `base` survive.
/// A non-object on either side replaces the base wholesale.
pub fn merge_props(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base.as_object_mut(), patch) {
        (Some(target), serde_json::Value::Object(incoming)) => {
            for (k, v) in incoming {
                target.insert(k, v);
            }
        }
        (_, serde_json::Value::Null) => {}
        (_, other) => *base = other,
    }
}

/// Construction options for a controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub viewport: Size,
    pub layout: LayoutConfig,
    /// Use the grid-search placement for manifests without a start position.
    pub auto_place: bool,
    pub language: String,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            viewport: Size::new(1440.0, 900.0),
            layout: LayoutConfig::default(),
            auto_place: true,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

type ChangeListener = Arc<dyn Fn(&WorkspaceState) + Send + Sync>;

struct ChangeListeners {
    entries: RwLock<Vec<(u64, ChangeListener)>>,
    next_id: AtomicU64,
}

/// Handle returned by [`WindowController::subscribe`].
#[derive(Clone)]
pub struct ChangeSubscription {
    listeners: Weak<ChangeListeners>,
    id: u64,
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription").field("id", &self.id).finish()
    }
}

impl ChangeSubscription {
    pub fn unsubscribe(&self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut guard = listeners
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = guard.len();
        guard.retain(|(id, _)| *id != self.id);
        guard.len() != before
    }
}

/// Authoritative owner of the live window collection.
pub struct WindowController {
    registry: Arc<WidgetRegistry>,
    state: RwLock<WorkspaceState>,
    viewport: RwLock<Size>,
    layout: LayoutConfig,
    auto_place: bool,
    default_language: String,
    listeners: Arc<ChangeListeners>,
    bus: RwLock<Option<EventBus>>,
}

impl std::fmt::Debug for WindowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowController")
            .field("windows", &self.len())
            .field("auto_place", &self.auto_place)
            .finish_non_exhaustive()
    }
}

impl WindowController {
    pub fn new(registry: Arc<WidgetRegistry>) -> Self {
        Self::with_options(registry, ControllerOptions::default())
    }

    pub fn with_options(registry: Arc<WidgetRegistry>, options: ControllerOptions) -> Self {
        Self {
            registry,
            state: RwLock::new(WorkspaceState::empty(&options.language)),
            viewport: RwLock::new(options.viewport),
            layout: options.layout,
            auto_place: options.auto_place,
            default_language: options.language,
            listeners: Arc::new(ChangeListeners {
                entries: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            bus: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<WidgetRegistry> {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Bus wiring
    // -----------------------------------------------------------------------

    /// Subscribes the controller to `bus`. `SPAWN` messages addressed to the controller
    /// become [`spawn`](Self::spawn) calls; closes are broadcast back on the same bus.
    pub fn attach_bus(self: &Arc<Self>, bus: &EventBus) -> Subscription {
        *self.bus.write().unwrap_or_else(|p| p.into_inner()) = Some(bus.clone());
        let weak = Arc::downgrade(self);
        bus.subscribe(move |msg| {
            if let Some(controller) = weak.upgrade() {
                controller.handle_bus_message(msg);
            }
        })
    }

    fn handle_bus_message(&self, msg: &BusMessage) {
        if !msg.is_for(CONTROLLER) || msg.kind != SPAWN {
            return;
        }
        let Some(widget_type) = msg
            .payload
            .get("widgetType")
            .or_else(|| msg.payload.get("type"))
            .and_then(|v| v.as_str())
        else {
            warn!(from = ?msg.from, "SPAWN message without widgetType ignored");
            return;
        };
        let props = msg.payload.get("props").cloned().unwrap_or_else(empty_props);
        let instance_id = msg.payload.get("instanceId").and_then(|v| v.as_str());
        self.spawn_with_id(widget_type, props, instance_id);
    }

    fn broadcast(&self, message: BusMessage) {
        let bus = self.bus.read().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(bus) = bus {
            bus.dispatch(&message);
        }
    }

    // -----------------------------------------------------------------------
    // State machine surface
    // -----------------------------------------------------------------------

    /// Snapshot of the current state.
    pub fn state(&self) -> WorkspaceState {
        self.read_state(|s| s.clone())
    }

    /// Registers a change listener, called with the new state after every mutation.
    pub fn subscribe<F>(&self, on_change: F) -> ChangeSubscription
    where
        F: Fn(&WorkspaceState) + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, Arc::new(on_change)));
        ChangeSubscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    fn read_state<R>(&self, f: impl FnOnce(&WorkspaceState) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(|p| p.into_inner());
        f(&guard)
    }

    /// Runs `f` under the write lock. When it reports a change, listeners are notified
    /// with the new snapshot once the lock is released.
    fn mutate<R>(&self, f: impl FnOnce(&mut WorkspaceState) -> Option<R>) -> Option<R> {
        let (result, snapshot) = {
            let mut guard = self.state.write().unwrap_or_else(|p| p.into_inner());
            let result = f(&mut guard);
            let snapshot = result.as_ref().map(|_| guard.clone());
            (result, snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.notify(&snapshot);
        }
        result
    }

    fn notify(&self, snapshot: &WorkspaceState) {
        let listeners: Vec<(u64, ChangeListener)> = self
            .listeners
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                error!(listener = id, "change listener panicked; continuing with remaining listeners");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Opens a widget, or re-focuses the existing instance it resolves to.
    pub fn spawn(&self, widget_type: &str, props: serde_json::Value) -> SpawnOutcome {
        self.spawn_with_id(widget_type, props, None)
    }

    /// Like [`spawn`](Self::spawn) with an explicit instance id (pop-out / rehydrate
    /// continuity). The id is used verbatim.
    pub fn spawn_with_id(
        &self,
        widget_type: &str,
        props: serde_json::Value,
        instance_id: Option<&str>,
    ) -> SpawnOutcome {
        let Some(manifest) = self.registry.get(widget_type) else {
            error!(widget_type = %widget_type, "spawn for unknown widget type ignored");
            return SpawnOutcome::Ignored;
        };
        let viewport = self.viewport();
        let explicit = instance_id.map(str::trim).filter(|s| !s.is_empty());

        self.mutate(|state| {
            let resolved = match explicit {
                Some(id) => Some(id.to_string()),
                None if manifest.singleton => state
                    .windows
                    .iter()
                    .find(|w| w.widget_type == manifest.id)
                    .map(|w| w.id.clone()),
                None => None,
            };

            if let Some(id) = resolved.as_deref() {
                if state.window(id).is_some() {
                    let z = state.next_z();
                    if let Some(w) = state.window_mut(id) {
                        merge_props(&mut w.props, props);
                        w.updated_at = Some(chrono::Utc::now().timestamp_millis());
                        w.is_minimized = false;
                        w.z_index = z;
                    }
                    debug!(widget_type = %manifest.id, window_id = %id, z, "spawn reused existing window");
                    return Some(SpawnOutcome::Reused(id.to_string()));
                }
            }

            let id = resolved.unwrap_or_else(|| generate_id(state, &manifest.id));
            let size = Size::new(manifest.meta.width(), manifest.meta.height());
            let position = self.initial_position(&manifest, state, size, viewport);
            let z = state.next_z();
            let props = match props {
                serde_json::Value::Null => empty_props(),
                other => other,
            };
            state.windows.push(WindowInstance {
                id: id.clone(),
                widget_type: manifest.id.clone(),
                props,
                z_index: z,
                position,
                size,
                is_minimized: false,
                updated_at: None,
            });
            debug!(widget_type = %manifest.id, window_id = %id, z, "window spawned");
            Some(SpawnOutcome::Created(id))
        })
        .unwrap_or(SpawnOutcome::Ignored)
    }

    fn initial_position(
        &self,
        manifest: &WidgetManifest,
        state: &WorkspaceState,
        size: Size,
        viewport: Size,
    ) -> Position {
        let step = (state.windows.len() % STAGGER_CYCLE) as f64 * STAGGER_STEP;
        match manifest.meta.start_position {
            Some(StartPosition::Anchor(Anchor::Center)) => Position::new(
                ((viewport.width - size.width) / 2.0).max(0.0),
                ((viewport.height - size.height) / 2.0).max(0.0),
            )
            .offset(step, step),
            Some(StartPosition::At(p)) => p.offset(step, step),
            None if self.auto_place => {
                let visible: Vec<Rect> = state
                    .windows
                    .iter()
                    .filter(|w| !w.is_minimized)
                    .map(WindowInstance::rect)
                    .collect();
                layout::place_with(&self.layout, &visible, size, viewport)
            }
            None => DEFAULT_ORIGIN.offset(step, step),
        }
    }

    /// Removes a window and broadcasts `WINDOW_CLOSED` so peers can drop shadow state.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.mutate(|state| {
            let pos = state.windows.iter().position(|w| w.id == id)?;
            Some(state.windows.remove(pos))
        });
        match removed {
            Some(window) => {
                debug!(window_id = %id, "window closed");
                self.broadcast(
                    BusMessage::broadcast(
                        WINDOW_CLOSED,
                        serde_json::json!({ "id": window.id, "widgetType": window.widget_type }),
                    )
                    .with_from(CONTROLLER),
                );
                true
            }
            None => {
                warn!(window_id = %id, "close for unknown window ignored");
                false
            }
        }
    }

    /// Hides a window in the dock. Keeps its z-index; idempotent.
    pub fn minimize(&self, id: &str) -> bool {
        let exists = self.read_state(|s| s.window(id).map(|w| w.is_minimized));
        match exists {
            None => {
                warn!(window_id = %id, "minimize for unknown window ignored");
                false
            }
            Some(true) => true,
            Some(false) => self
                .mutate(|state| {
                    let w = state.window_mut(id)?;
                    w.is_minimized = true;
                    Some(())
                })
                .is_some(),
        }
    }

    /// Restores and raises a window. Always consumes a fresh z value.
    pub fn focus(&self, id: &str) -> bool {
        let focused = self.mutate(|state| {
            state.window(id)?;
            let z = state.next_z();
            let w = state.window_mut(id)?;
            w.is_minimized = false;
            w.z_index = z;
            Some(z)
        });
        if focused.is_none() {
            warn!(window_id = %id, "focus for unknown window ignored");
        }
        focused.is_some()
    }

    /// Shallow-merges `patch.props` into the window's props and applies the other fields.
    pub fn update(&self, id: &str, patch: WindowPatch) -> bool {
        let updated = self.mutate(|state| {
            let w = state.window_mut(id)?;
            if let Some(props) = patch.props {
                merge_props(&mut w.props, props);
                w.updated_at = Some(chrono::Utc::now().timestamp_millis());
            }
            if let Some(position) = patch.position {
                w.position = position;
            }
            if let Some(size) = patch.size {
                w.size = size;
            }
            if let Some(minimized) = patch.is_minimized {
                w.is_minimized = minimized;
            }
            Some(())
        });
        if updated.is_none() {
            debug!(window_id = %id, "update for unknown window ignored");
        }
        updated.is_some()
    }

    // -----------------------------------------------------------------------
    // Persistence shape
    // -----------------------------------------------------------------------

    /// JSON-safe snapshot (non-finite numbers scrubbed, round-tripped through JSON).
    pub fn serialize(&self) -> WorkspaceState {
        let mut snapshot = self.state();
        snapshot.sanitize();
        serde_json::to_value(&snapshot)
            .and_then(serde_json::from_value)
            .unwrap_or(snapshot)
    }

    pub fn serialize_json(&self) -> serde_json::Value {
        serde_json::to_value(self.serialize()).unwrap_or(serde_json::Value::Null)
    }

    /// Replaces the whole workspace. Absent or malformed input yields a fresh workspace.
    pub fn hydrate(&self, state: Option<&serde_json::Value>) {
        let parsed = match state {
            Some(value) if value.get("windows").map(|w| w.is_array()).unwrap_or(false) => {
                match serde_json::from_value::<WorkspaceState>(value.clone()) {
                    Ok(mut s) => {
                        // documents saved without a language take the configured default
                        if !value.get("language").is_some_and(|l| l.is_string()) {
                            s.language = self.default_language.clone();
                        }
                        Some(s)
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed workspace state; starting fresh");
                        None
                    }
                }
            }
            Some(_) => {
                warn!("workspace state has no window collection; starting fresh");
                None
            }
            None => None,
        };
        self.hydrate_state(parsed);
    }

    pub fn hydrate_state(&self, state: Option<WorkspaceState>) {
        let mut next = state.unwrap_or_else(|| WorkspaceState::empty(&self.default_language));
        next.sanitize();
        self.mutate(move |s| {
            *s = next;
            Some(())
        });
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn window(&self, id: &str) -> Option<WindowInstance> {
        self.read_state(|s| s.window(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.read_state(|s| s.windows.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All windows, lowest z first (draw order).
    pub fn windows_sorted_by_z(&self) -> Vec<WindowInstance> {
        let mut windows = self.read_state(|s| s.windows.clone());
        windows.sort_by_key(|w| w.z_index);
        windows
    }

    pub fn visible_windows(&self) -> Vec<WindowInstance> {
        self.windows_sorted_by_z()
            .into_iter()
            .filter(|w| !w.is_minimized)
            .collect()
    }

    /// Minimised windows for the dock.
    pub fn minimized_windows(&self) -> Vec<WindowInstance> {
        self.windows_sorted_by_z()
            .into_iter()
            .filter(|w| w.is_minimized)
            .collect()
    }

    pub fn top_z(&self) -> u64 {
        self.read_state(|s| s.top_z)
    }

    pub fn viewport(&self) -> Size {
        *self.viewport.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_viewport(&self, viewport: Size) {
        *self.viewport.write().unwrap_or_else(|p| p.into_inner()) = viewport;
    }

    pub fn language(&self) -> String {
        self.read_state(|s| s.language.clone())
    }

    pub fn set_language(&self, language: &str) {
        self.mutate(|s| {
            if s.language == language {
                return None;
            }
            s.language = language.to_string();
            Some(())
        });
    }

    /// Stores an auxiliary value in the persisted metadata bag.
    pub fn set_metadata(&self, key: &str, value: serde_json::Value) {
        self.mutate(|s| {
            s.metadata.insert(key.to_string(), value);
            Some(())
        });
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Handle that lets a widget update its own window and nothing else.
    pub fn updater(self: &Arc<Self>, id: &str) -> WindowUpdater {
        WindowUpdater {
            controller: Arc::downgrade(self),
            instance_id: id.to_string(),
        }
    }

    /// Invokes the widget's renderer with `(props, updater, language)`.
    pub fn render(self: &Arc<Self>, id: &str) -> Option<serde_json::Value> {
        let window = self.window(id)?;
        let manifest = self.registry.get(&window.widget_type)?;
        let renderer = manifest.renderer.as_ref()?;
        let language = self.language();
        let updater = self.updater(id);
        Some(renderer.render(&RenderContext {
            instance_id: &window.id,
            props: &window.props,
            language: &language,
            updater: &updater,
        }))
    }
}

fn generate_id(state: &WorkspaceState, widget_type: &str) -> String {
    loop {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        let candidate = format!("{}-{}", widget_type, &simple[..8]);
        if state.window(&candidate).is_none() {
            return candidate;
        }
    }
}

/// A widget's narrow channel back into [`WindowController::update`] for its own instance.
#[derive(Debug, Clone)]
pub struct WindowUpdater {
    controller: Weak<WindowController>,
    instance_id: String,
}

impl WindowUpdater {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Applies `patch` to the bound window. False if the controller or window is gone.
    pub fn update(&self, patch: WindowPatch) -> bool {
        match self.controller.upgrade() {
            Some(controller) => controller.update(&self.instance_id, patch),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WidgetMeta;
    use serde_json::json;

    fn registry() -> Arc<WidgetRegistry> {
        let reg = WidgetRegistry::new();
        reg.register(WidgetManifest::new("notes", WidgetMeta::new("Notes", "📝", "Notes")).singleton())
            .unwrap();
        reg.register(
            WidgetManifest::new("image-viewer", WidgetMeta::new("Image", "🖼", "Images").with_size(500.0, 400.0)),
        )
        .unwrap();
        reg.register(
            WidgetManifest::new("clock", WidgetMeta::new("Clock", "⏰", "Clock").with_start(StartPosition::Anchor(Anchor::Center))),
        )
        .unwrap();
        Arc::new(reg)
    }

    #[test]
    fn merge_props_is_shallow() {
        let mut base = json!({"a": 1, "nested": {"x": 1}});
        merge_props(&mut base, json!({"b": 2, "nested": {"y": 2}}));
        assert_eq!(base, json!({"a": 1, "b": 2, "nested": {"y": 2}}));
        merge_props(&mut base, serde_json::Value::Null);
        assert_eq!(base["a"], 1);
    }

    #[test]
    fn unknown_widget_is_ignored() {
        let c = WindowController::new(registry());
        assert_eq!(c.spawn("nope", json!({})), SpawnOutcome::Ignored);
        assert!(c.is_empty());
        assert_eq!(c.top_z(), Z_FLOOR);
    }

    #[test]
    fn spawn_uses_manifest_size_and_fallback() {
        let c = WindowController::new(registry());
        let id = c.spawn("image-viewer", json!({})).id().unwrap().to_string();
        assert_eq!(c.window(&id).unwrap().size, Size::new(500.0, 400.0));
        let id = c.spawn("notes", json!({})).id().unwrap().to_string();
        assert_eq!(c.window(&id).unwrap().size, Size::new(400.0, 300.0));
    }

    #[test]
    fn center_start_is_staggered() {
        let options = ControllerOptions {
            viewport: Size::new(1200.0, 800.0),
            ..Default::default()
        };
        let c = WindowController::with_options(registry(), options);
        let first = c.spawn("clock", json!({})).id().unwrap().to_string();
        let second = c.spawn("clock", json!({})).id().unwrap().to_string();
        assert_eq!(c.window(&first).unwrap().position, Position::new(400.0, 250.0));
        assert_eq!(
            c.window(&second).unwrap().position,
            Position::new(400.0 + STAGGER_STEP, 250.0 + STAGGER_STEP)
        );
    }

    #[test]
    fn minimize_is_idempotent_and_keeps_z() {
        let c = WindowController::new(registry());
        let id = c.spawn("notes", json!({})).id().unwrap().to_string();
        let z = c.window(&id).unwrap().z_index;
        assert!(c.minimize(&id));
        assert!(c.minimize(&id));
        let w = c.window(&id).unwrap();
        assert!(w.is_minimized);
        assert_eq!(w.z_index, z);
        assert_eq!(c.minimized_windows().len(), 1);
        assert!(c.visible_windows().is_empty());
    }

    #[test]
    fn focus_always_consumes_new_z() {
        let c = WindowController::new(registry());
        let id = c.spawn("notes", json!({})).id().unwrap().to_string();
        let z1 = c.window(&id).unwrap().z_index;
        c.minimize(&id);
        assert!(c.focus(&id));
        let z2 = c.window(&id).unwrap().z_index;
        assert!(c.focus(&id));
        let z3 = c.window(&id).unwrap().z_index;
        assert!(z1 < z2 && z2 < z3);
        assert!(!c.window(&id).unwrap().is_minimized);
        assert!(!c.focus("missing"));
    }

    #[test]
    fn change_listeners_fire_after_mutation() {
        let c = WindowController::new(registry());
        let count = Arc::new(AtomicU64::new(0));
        let seen = count.clone();
        let sub = c.subscribe(move |state| {
            assert!(state.top_z > Z_FLOOR);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        c.spawn("notes", json!({}));
        c.update("missing", WindowPatch::props(json!({"x": 1})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(sub.unsubscribe());
        c.spawn("image-viewer", json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_change_listener_does_not_reach_caller() {
        let c = WindowController::new(registry());
        c.subscribe(|_| panic!("listener failure"));
        let count = Arc::new(AtomicU64::new(0));
        let seen = count.clone();
        c.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = c.spawn("notes", json!({}));
        assert!(matches!(outcome, SpawnOutcome::Created(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let id = outcome.id().unwrap().to_string();
        assert!(c.focus(&id));
        assert!(c.close(&id));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(c.is_empty());
    }

    #[test]
    fn hydrate_without_language_uses_configured_default() {
        let options = ControllerOptions {
            language: "de".to_string(),
            ..Default::default()
        };
        let c = WindowController::with_options(registry(), options.clone());
        c.set_language("fr");
        c.hydrate(Some(&json!({"windows": []})));
        assert_eq!(c.language(), "de");
        assert_eq!(c.state(), WindowController::with_options(registry(), options).state());

        c.hydrate(Some(&json!({"windows": [], "language": "nb"})));
        assert_eq!(c.language(), "nb");
    }

    #[test]
    fn updater_is_bound_to_its_window() {
        let c = Arc::new(WindowController::new(registry()));
        let a = c.spawn("image-viewer", json!({"src": "a.png"})).id().unwrap().to_string();
        let b = c.spawn("image-viewer", json!({"src": "b.png"})).id().unwrap().to_string();
        let updater = c.updater(&a);
        assert!(updater.update(WindowPatch::props(json!({"zoom": 2}))));
        assert_eq!(c.window(&a).unwrap().props, json!({"src": "a.png", "zoom": 2}));
        assert_eq!(c.window(&b).unwrap().props, json!({"src": "b.png"}));

        let view = c.render(&a).unwrap();
        assert_eq!(view["instanceId"], a.as_str());
        assert_eq!(view["language"], DEFAULT_LANGUAGE);
    }

    #[test]
    fn hydrate_repairs_counter_and_duplicates() {
        let c = WindowController::new(registry());
        c.hydrate(Some(&json!({
            "windows": [
                {"id": "n", "widgetType": "notes", "zIndex": 150, "position": {"x": 0, "y": 0}, "size": {"width": 10, "height": 10}},
                {"id": "n", "widgetType": "notes", "zIndex": 151, "position": {"x": 0, "y": 0}, "size": {"width": 10, "height": 10}}
            ],
            "topZ": 3
        })));
        assert_eq!(c.len(), 1);
        assert_eq!(c.top_z(), 150);
        assert_eq!(c.language(), DEFAULT_LANGUAGE);
    }

    #[test]
    fn close_broadcasts_on_attached_bus() {
        let c = Arc::new(WindowController::new(registry()));
        let bus = EventBus::new();
        c.attach_bus(&bus);
        let closed = Arc::new(RwLock::new(Vec::<String>::new()));
        let sink = closed.clone();
        bus.subscribe(move |m| {
            if m.kind == WINDOW_CLOSED {
                sink.write().unwrap().push(m.payload["id"].as_str().unwrap().to_string());
            }
        });

        bus.dispatch(&BusMessage::spawn("notes", json!({"text": "hi"})));
        let id = c.state().windows[0].id.clone();
        assert!(c.close(&id));
        assert!(!c.close(&id));
        assert_eq!(*closed.read().unwrap(), vec![id]);
    }
}
