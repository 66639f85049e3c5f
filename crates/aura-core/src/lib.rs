//! aura-core: workspace orchestration core (window controller, layout, event bus,
//! widget registry, selection, persistence and the chat session around them).
//!
//! Everything is constructed explicitly and injected; there are no process globals, so tests
//! build a fresh bus/registry per case.

pub mod bus;
mod config;
mod context;
pub mod controller;
mod error;
pub mod layout;
pub mod persistence;
pub mod reflection;
pub mod registry;
pub mod selection;
mod session;
pub mod validator;

// Bus
pub use bus::{BusMessage, EventBus, Subscription, BROADCAST, CONTROLLER, SPAWN, TOOL_CALL, WINDOW_CLOSED};

// Registry + validation
pub use registry::{
    missing_required_fields, Anchor, DescriptorRenderer, Discovery, RenderContext, StartPosition,
    StateSchema, ToolSpec, WidgetManifest, WidgetMeta, WidgetRegistry, WidgetRenderer,
};
pub use validator::{validate, validate_or_throw, ValidationReport};

// Layout
pub use layout::{place, LayoutConfig, Percent, PercentPlacer, PercentRect, Position, Rect, Size};

// Controller
pub use controller::{
    merge_props, ChangeSubscription, ControllerOptions, SpawnOutcome, WindowController,
    WindowInstance, WindowPatch, WindowUpdater, WorkspaceState, Z_FLOOR,
};

// Selection
pub use selection::{ActiveSet, ScoredWidget, SelectOptions, SelectionEngine};

// Context fetch
pub use context::{fetch_context, format_context, resolve_document, WidgetContext};

// Persistence
pub use persistence::{
    blob_key, get_as, list_as, BlobStore, Filter, FilterOp, MemoryGateway, PersistenceGateway,
    SledBlobStore, SledGateway, WORKSPACES,
};

// Reflection
pub use reflection::{
    parse_actions, Attachment, ChatRole, HistoryTurn, OpenRouterReflector, ReflectAction,
    ReflectionClient, ReflectionRequest,
};

// Session
pub use session::{ChatMessage, SessionBuilder, TurnResult, WorkspaceSession, CHAT, CHATS, FALLBACK_REPLY};

// Config + errors
pub use config::{UserConfig, WorkspaceConfig};
pub use error::{ConfigError, ReflectionError, StoreError, StoreResult, ValidationError};
